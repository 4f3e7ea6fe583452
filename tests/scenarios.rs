//! Boundary-scenario tests driven against `FakeRuntime`, exercising the
//! engine end to end with no Docker daemon involved.

use taskforge::{
    engine::{exit_code, run_task, RunOptions},
    logger::simple::QuietLogger,
    model::{BehaviourAfterFailure, Container, HealthCheckTiming, ImageSource},
    runtime::{
        fake::{ContainerScript, FakeRuntime},
        HealthStreamOutcome,
    },
};

fn pulled(name: &str, deps: &[&str]) -> Container {
    Container::new(name, ImageSource::PullImage(format!("{name}:latest")))
        .with_dependencies(deps.iter().map(|s| s.to_string()))
}

fn built(name: &str, deps: &[&str]) -> Container {
    Container::new(
        name,
        ImageSource::BuildImage {
            directory: ".".to_owned(),
            build_args: Vec::new(),
        },
    )
    .with_dependencies(deps.iter().map(|s| s.to_string()))
}

async fn run(
    containers: &[Container],
    task_container: &str,
    runtime: std::sync::Arc<FakeRuntime>,
    options: RunOptions,
) -> taskforge::Result<i32> {
    run_task(containers, task_container, runtime, &QuietLogger, options).await
}

#[tokio::test]
async fn happy_path_single_container() {
    let containers = vec![pulled("app", &[])];
    let runtime = taskforge::runtime::fake::shared();

    let code = run(&containers, "app", runtime.clone(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(code, 0);
    let calls = runtime.calls();
    assert!(calls.iter().any(|c| c.starts_with("create_network:")));
    assert!(calls.iter().any(|c| c.starts_with("pull:app")));
    assert!(calls.iter().any(|c| c.starts_with("create:app")));
    assert!(calls.iter().any(|c| c.starts_with("run:app-rc")));
    assert!(calls.iter().any(|c| c.starts_with("remove:app-rc")));
    assert!(calls.iter().any(|c| c.starts_with("delete_network:")));
    // the exited task container is never itself stopped, only removed
    assert!(!calls.iter().any(|c| c.starts_with("stop:app-rc")));
}

#[tokio::test]
async fn dependency_is_started_then_stopped_around_task_container() {
    let containers = vec![built("app", &["db"]), pulled("db", &[])];
    let runtime = taskforge::runtime::fake::shared();
    runtime.script(
        "db",
        ContainerScript {
            health_check_presence: true,
            ..Default::default()
        },
    );

    let code = run(&containers, "app", runtime.clone(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(code, 0);
    let calls = runtime.calls();
    let create_db = calls.iter().position(|c| c == "create:db").unwrap();
    let create_app = calls.iter().position(|c| c == "create:app").unwrap();
    let start_db = calls.iter().position(|c| c.starts_with("start:db-rc")).unwrap();
    let run_app = calls.iter().position(|c| c.starts_with("run:app-rc")).unwrap();
    let stop_db = calls.iter().position(|c| c.starts_with("stop:db-rc")).unwrap();
    let remove_db = calls
        .iter()
        .position(|c| c.starts_with("remove:db-rc"))
        .unwrap();

    assert!(create_db < create_app, "dependency created before dependent");
    assert!(start_db < run_app, "dependency started before task container runs");
    assert!(run_app < stop_db, "dependency stopped only after task container exits");
    assert!(stop_db < remove_db);
}

#[tokio::test]
async fn image_build_failure_aborts_and_still_removes_the_network() {
    let containers = vec![built("app", &[])];
    let runtime = taskforge::runtime::fake::shared();
    runtime.script(
        "app",
        ContainerScript {
            fail_build_or_pull: Some("Dockerfile not found".to_owned()),
            ..Default::default()
        },
    );

    let code = run(&containers, "app", runtime.clone(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(code, exit_code::ORCHESTRATION_FAILURE);
    let calls = runtime.calls();
    assert!(calls.iter().any(|c| c.starts_with("build:app")));
    // the container never got far enough to be created
    assert!(!calls.iter().any(|c| c.starts_with("create:app")));
    // the network still converges to deletion even though nothing ran
    assert!(calls.iter().any(|c| c.starts_with("delete_network:")));
}

#[tokio::test]
async fn container_creation_failure_cleans_up_healthy_dependency() {
    let containers = vec![pulled("app", &["db"]), pulled("db", &[])];
    let runtime = taskforge::runtime::fake::shared();
    runtime.script(
        "app",
        ContainerScript {
            fail_create: Some("port already allocated".to_owned()),
            ..Default::default()
        },
    );

    let code = run(&containers, "app", runtime.clone(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(code, exit_code::ORCHESTRATION_FAILURE);
    let calls = runtime.calls();
    // db came up and must be cleaned up even though app never got created
    assert!(calls.iter().any(|c| c.starts_with("create:db")));
    assert!(calls.iter().any(|c| c.starts_with("start:db-rc")));
    assert!(calls.iter().any(|c| c.starts_with("remove:db-rc")));
    assert!(!calls.iter().any(|c| c.starts_with("create:app")));
    assert!(calls.iter().any(|c| c.starts_with("delete_network:")));
}

#[tokio::test]
async fn dont_cleanup_leaves_created_containers_running() {
    let containers = vec![pulled("app", &["db"]), pulled("db", &[])];
    let runtime = taskforge::runtime::fake::shared();
    runtime.script(
        "app",
        ContainerScript {
            fail_start: Some("exec format error".to_owned()),
            ..Default::default()
        },
    );

    let options = RunOptions {
        behaviour_after_failure: BehaviourAfterFailure::DontCleanup,
        ..RunOptions::default()
    };
    let code = run(&containers, "app", runtime.clone(), options).await.unwrap();

    assert_eq!(code, exit_code::ORCHESTRATION_FAILURE);
    let calls = runtime.calls();
    assert!(calls.iter().any(|c| c.starts_with("create:db")));
    assert!(calls.iter().any(|c| c.starts_with("start:db-rc")));
    // db was never stopped or removed: the user asked to leave it running
    assert!(!calls.iter().any(|c| c.starts_with("stop:db-rc")));
    assert!(!calls.iter().any(|c| c.starts_with("remove:db-rc")));
}

#[tokio::test]
async fn healthcheck_failure_prevents_task_container_from_ever_running() {
    let db = pulled("db", &[]).with_health_check(HealthCheckTiming {
        interval: std::time::Duration::from_millis(10),
        retries: 2,
        start_period: std::time::Duration::from_millis(0),
    });
    let containers = vec![pulled("app", &["db"]), db];
    let runtime = taskforge::runtime::fake::shared();
    runtime.script(
        "db",
        ContainerScript {
            health_check_presence: true,
            health_outcome: Some(HealthStreamOutcome::Unhealthy),
            health_log: Some((1, "probe failed: connection refused".to_owned())),
            ..Default::default()
        },
    );

    let code = run(&containers, "app", runtime.clone(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(code, exit_code::ORCHESTRATION_FAILURE);
    let calls = runtime.calls();
    assert!(!calls.iter().any(|c| c.starts_with("create:app")));
    assert!(calls.iter().any(|c| c.starts_with("remove:db-rc")));
}

#[tokio::test]
async fn network_creation_failure_before_anything_else_still_converges() {
    let containers = vec![pulled("app", &[])];
    let runtime = taskforge::runtime::fake::shared();
    runtime.fail_network_create("daemon unreachable");

    let code = run(&containers, "app", runtime.clone(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(code, exit_code::ORCHESTRATION_FAILURE);
    let calls = runtime.calls();
    assert!(!calls.iter().any(|c| c.starts_with("delete_network:")));
    assert!(!calls.iter().any(|c| c.starts_with("create:app")));
}

#[tokio::test]
async fn cleanup_of_an_already_gone_container_still_converges() {
    // `remove` on the fake always succeeds regardless of prior state, which
    // is the behaviour the real adapter gives for a container Docker has
    // already reaped (idempotent `ContainerRemoved`).
    let containers = vec![pulled("app", &[])];
    let runtime = taskforge::runtime::fake::shared();

    let code = run(&containers, "app", runtime.clone(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(code, 0);
}

#[tokio::test]
async fn repeated_healthy_event_does_not_double_run_the_task_container() {
    use taskforge::{context::TaskEventContext, event::TaskEvent, graph::DependencyGraph, model::RuntimeContainer};

    let containers = vec![pulled("app", &[])];
    let graph = DependencyGraph::resolve(&containers, "app").unwrap();
    let mut ctx = TaskEventContext::new(graph, BehaviourAfterFailure::Cleanup, false);

    let container = ctx.container("app").unwrap().clone();
    ctx.post_event(TaskEvent::TaskStarted);
    ctx.post_event(TaskEvent::ImagePulled {
        container: container.clone(),
        image: taskforge::model::RuntimeImage("app:latest".to_owned()),
    });
    ctx.post_event(TaskEvent::TaskNetworkCreated(taskforge::model::RuntimeNetwork(
        "net".to_owned(),
    )));
    ctx.post_event(TaskEvent::ContainerCreated {
        container: container.clone(),
        runtime_container: RuntimeContainer("app-rc".to_owned()),
    });
    ctx.post_event(TaskEvent::ContainerBecameHealthy {
        container: container.clone(),
    });
    let first_len = ctx.event_log().len();
    // posting the same healthy event again must not enqueue a second run
    ctx.post_event(TaskEvent::ContainerBecameHealthy { container });
    assert_eq!(ctx.event_log().len(), first_len + 1);
}

#[tokio::test]
async fn unknown_dependency_is_a_configuration_error_before_any_run() {
    let containers = vec![pulled("app", &["ghost"])];
    let runtime = taskforge::runtime::fake::shared();
    let err = run(&containers, "app", runtime.clone(), RunOptions::default())
        .await
        .unwrap_err();
    assert!(format!("{err:?}").contains("UnknownDependency"));
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn diamond_dependencies_all_come_up_before_the_task_container() {
    let containers = vec![
        built("app", &["left", "right"]),
        pulled("left", &["base"]),
        pulled("right", &["base"]),
        pulled("base", &[]),
    ];
    let runtime = taskforge::runtime::fake::shared();

    let code = run(&containers, "app", runtime.clone(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(code, 0);
    let calls = runtime.calls();
    let run_app = calls.iter().position(|c| c.starts_with("run:app-rc")).unwrap();
    for name in ["left", "right", "base"] {
        let started = calls
            .iter()
            .position(|c| c.starts_with(&format!("start:{name}-rc")))
            .unwrap();
        assert!(started < run_app, "{name} must start before the task container runs");
    }
}

#[tokio::test]
async fn task_exit_code_takes_precedence_over_a_nonzero_cleanup_outcome() {
    // the task container's own exit code wins even if cleanup afterwards
    // hits trouble.
    let containers = vec![pulled("app", &[])];
    let runtime = taskforge::runtime::fake::shared();
    runtime.script(
        "app",
        ContainerScript {
            exit_code: 7,
            ..Default::default()
        },
    );

    let code = run(&containers, "app", runtime.clone(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(code, 7);
}

#[test]
fn health_check_timeout_is_interval_times_retries_plus_start_period() {
    let timing = HealthCheckTiming {
        interval: std::time::Duration::from_secs(2),
        retries: 5,
        start_period: std::time::Duration::from_secs(10),
    };
    assert_eq!(timing.timeout(), std::time::Duration::from_secs(20));
}
