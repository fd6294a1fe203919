//! Worker lifecycle tests
//!
//! Drive the full request loop over in-memory I/O with the mock environment
//! factory and check which environment served each request.

use std::io::Cursor;

use serde_json::json;

use cljw_protocol::WorkResponse;
use cljw_worker::mock::{EnvironmentEvent, MockFactory};
use cljw_worker::{
    Dispatcher, EntryPoints, Environment, EnvironmentId, LoopSummary, Role, WorkerConfig, WorkerLoop,
};

fn scripted_factory() -> MockFactory {
    let factory = MockFactory::new();
    factory.respond(&EntryPoints::default().plan, json!("(compile 'app.core)"));
    factory
}

/// One request line; `inputs` are (path, digest) pairs that also form the
/// classpath, in order.
fn request_line(request_id: i32, inputs: &[(&str, &str)]) -> String {
    let classpath: Vec<&str> = inputs.iter().map(|(path, _)| *path).collect();
    let payload = json!({
        "aot": ["app.core"],
        "classes-dir": "bazel-out/classes",
        "classpath": classpath,
        "output-jar": "bazel-out/app.jar",
        "src-dir": "src",
        "srcs": ["src/app/core.clj"],
    });
    let inputs: Vec<_> = inputs
        .iter()
        .map(|(path, digest)| json!({"path": path, "digest": digest}))
        .collect();
    format!(
        "{}\n",
        json!({"arguments": [payload.to_string()], "inputs": inputs, "requestId": request_id})
    )
}

fn run(factory: &MockFactory, config: WorkerConfig, input: String) -> (LoopSummary, Vec<WorkResponse>) {
    let mut worker = WorkerLoop::new(Dispatcher::new(config, factory.clone()));
    let mut output = Vec::new();
    let summary = worker
        .run_with_io(&mut Cursor::new(input), &mut output)
        .unwrap();
    let responses = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    (summary, responses)
}

/// Compile environment that served each compile invocation, in order.
fn compile_servers(factory: &MockFactory) -> Vec<EnvironmentId> {
    let compile = EntryPoints::default().compile;
    factory
        .events()
        .into_iter()
        .filter_map(|event| match event {
            EnvironmentEvent::Invoked { id, entry_point } if entry_point == compile => Some(id),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Test 1: identical digest maps share one environment
// =============================================================================

#[test]
fn test_identical_requests_reuse_environment() {
    let factory = scripted_factory();
    let input = [
        request_line(1, &[("a.jar", "d1")]),
        request_line(2, &[("a.jar", "d1")]),
        request_line(3, &[("a.jar", "d1")]),
    ]
    .concat();

    let (summary, responses) = run(&factory, WorkerConfig::default(), input);

    assert_eq!(summary, LoopSummary { requests: 3, failures: 0 });
    assert!(responses.iter().all(WorkResponse::is_success));
    let servers = compile_servers(&factory);
    assert_eq!(servers.len(), 3);
    assert!(servers.iter().all(|id| *id == servers[0]));
    assert_eq!(factory.created(Role::Compile).len(), 1);
}

// =============================================================================
// Test 2: grow, then rebuild on a changed digest
// =============================================================================

#[test]
fn test_grow_then_rebuild_scenario() {
    let factory = scripted_factory();
    let input = [
        request_line(1, &[("a.jar", "d1")]),
        request_line(2, &[("a.jar", "d1"), ("b.jar", "d2")]),
        request_line(3, &[("a.jar", "d3"), ("b.jar", "d2")]),
    ]
    .concat();

    let (_, responses) = run(&factory, WorkerConfig::default(), input);
    assert!(responses.iter().all(WorkResponse::is_success));

    let servers = compile_servers(&factory);
    let (e1, e2) = (servers[0], servers[2]);
    assert_eq!(servers[1], e1);
    assert_ne!(e2, e1);

    let events = factory.events();
    let position = |wanted: &EnvironmentEvent| events.iter().position(|e| e == wanted).unwrap();

    // E1 grew by b.jar before the digest change.
    let grew = position(&EnvironmentEvent::LocationAdded {
        id: e1,
        location: "b.jar".to_string(),
    });
    let discarded = position(&EnvironmentEvent::Discarded { id: e1 });
    let created = position(&EnvironmentEvent::Created {
        id: e2,
        role: Role::Compile,
    });
    let first_load = position(&EnvironmentEvent::LocationAdded {
        id: e2,
        location: "a.jar".to_string(),
    });
    assert!(grew < discarded);
    assert!(discarded < created);
    assert!(created < first_load);
    assert_eq!(factory.discards(e1), 1);
    assert!(factory.overlaps().is_empty());
}

// =============================================================================
// Test 3: a location only on the new side is not a mismatch
// =============================================================================

#[test]
fn test_untracked_and_new_locations_do_not_rebuild() {
    let factory = scripted_factory();
    let input = [
        request_line(1, &[("a.jar", "d1"), ("src", "")]),
        request_line(2, &[("a.jar", "d1"), ("src", ""), ("c.jar", "d4")]),
    ]
    .concat();

    run(&factory, WorkerConfig::default(), input);

    let servers = compile_servers(&factory);
    assert_eq!(servers[0], servers[1]);
}

// =============================================================================
// Test 4: reload serves the next request from a fresh environment
// =============================================================================

#[test]
fn test_reload_then_fresh_environment() {
    let factory = scripted_factory();
    factory.respond_once(&EntryPoints::default().compile, json!("reload"));
    let input = [
        request_line(1, &[("a.jar", "d1")]),
        request_line(2, &[("a.jar", "d1")]),
    ]
    .concat();

    let (_, responses) = run(&factory, WorkerConfig::default(), input);

    assert_eq!(responses[0].exit_code, 0);
    assert_eq!(responses[1].exit_code, 0);
    let servers = compile_servers(&factory);
    assert_ne!(servers[0], servers[1]);
    assert_eq!(factory.discards(servers[0]), 1);
}

// =============================================================================
// Test 5: restart retries once, a second restart fails the request only
// =============================================================================

#[test]
fn test_restart_once_succeeds() {
    let factory = scripted_factory();
    factory.respond_once(&EntryPoints::default().compile, json!(":rules-clojure.compile/restart"));

    let (_, responses) = run(
        &factory,
        WorkerConfig::default(),
        request_line(1, &[("a.jar", "d1")]),
    );

    assert!(responses[0].is_success());
    let servers = compile_servers(&factory);
    assert_eq!(servers.len(), 2);
    assert_ne!(servers[0], servers[1]);
    assert!(factory.overlaps().is_empty());
}

#[test]
fn test_restart_twice_fails_and_worker_continues() {
    let factory = scripted_factory();
    let compile = EntryPoints::default().compile;
    factory
        .respond_once(&compile, json!("restart"))
        .respond_once(&compile, json!("restart"));
    let input = [
        request_line(1, &[("a.jar", "d1")]),
        request_line(2, &[("a.jar", "d1")]),
    ]
    .concat();

    let (summary, responses) = run(&factory, WorkerConfig::default(), input);

    assert_eq!(summary.failures, 1);
    assert_eq!(responses[0].exit_code, 1);
    assert_eq!(responses[0].request_id, 1);
    assert!(responses[0].output.contains("RESTART_LOOP"));
    assert!(responses[1].is_success());
    assert_eq!(factory.created(Role::Compile).len(), 3);
}

// =============================================================================
// Test 6: failures never escape the loop
// =============================================================================

#[test]
fn test_errors_become_responses() {
    let factory = scripted_factory();
    factory.fail_once(&EntryPoints::default().compile, "Unable to resolve symbol: foo");
    factory.fail_location("gone.jar");
    let input = [
        "{\"arguments\": [\"{}\"]}\n".to_string(),
        request_line(2, &[("gone.jar", "d1")]),
        request_line(3, &[("a.jar", "d1")]),
        request_line(4, &[("a.jar", "d1")]),
    ]
    .concat();

    let (summary, responses) = run(&factory, WorkerConfig::default(), input);

    assert_eq!(summary, LoopSummary { requests: 4, failures: 3 });
    assert!(responses[0].output.starts_with("INVALID_REQUEST"));
    assert!(responses[1].output.contains("RESOLUTION_FAILED"));
    assert!(responses[2].output.contains("COMPILER_FAILED"));
    assert!(responses[2].output.contains("Unable to resolve symbol: foo"));
    assert!(responses[3].is_success());
}

// =============================================================================
// Test 7: unit identity is scoped to its environment
// =============================================================================

#[test]
fn test_units_from_different_environments_differ() {
    let factory = scripted_factory();
    factory.respond_once(&EntryPoints::default().compile, json!("restart"));
    let mut dispatcher = Dispatcher::new(WorkerConfig::default(), factory.clone());
    let mut worker_input = Cursor::new(request_line(1, &[("a.jar", "d1")]));

    // Handle the request directly so the live environment can be inspected.
    let request = cljw_protocol::read_message(&mut worker_input, 1 << 20)
        .unwrap()
        .unwrap();
    assert!(dispatcher.handle(&request).is_success());

    let compile = EntryPoints::default().compile;
    let env = dispatcher.caches().get(Role::Compile).environment().unwrap();
    let unit = env
        .units()
        .iter()
        .find(|unit| unit.name() == compile)
        .unwrap()
        .clone();
    let first = factory.created(Role::Compile)[0];
    let stale = cljw_worker::UnitId::new(first, compile.as_str());

    assert!(unit.same_name(&stale));
    assert_ne!(unit, stale);
    dispatcher.shutdown();
}

// =============================================================================
// Test 8: end of input is an orderly shutdown
// =============================================================================

#[test]
fn test_end_of_input_discards_all_environments() {
    let factory = scripted_factory();

    run(&factory, WorkerConfig::default(), request_line(1, &[("a.jar", "d1")]));

    assert_eq!(factory.live(Role::Compile), None);
    assert_eq!(factory.live(Role::Tooling), None);
    assert!(factory.leaked().is_empty());
    for id in factory
        .created(Role::Compile)
        .into_iter()
        .chain(factory.created(Role::Tooling))
    {
        assert_eq!(factory.discards(id), 1);
    }
}
