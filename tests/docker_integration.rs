//! Integration tests against a live Docker daemon.
//!
//! Run with: cargo test --test docker_integration -- --ignored

use std::time::Duration;

use containment::config::ExecConfig;
use containment::docker::{BollardDockerManager, DockerExecutor, DockerManager};
use containment::{
    AbsentImageAction, AbsentImageDirective, ContainerRunner, ContainerSpec, ContainmentError,
    RequireImageConfig,
};

const BASE_IMAGE: &str = "busybox:latest";

async fn ensure_base_image(manager: &BollardDockerManager) {
    let config = RequireImageConfig::new(BASE_IMAGE)
        .with_directive(AbsentImageDirective::new(AbsentImageAction::Pull))
        .with_pull_timeout(Duration::from_secs(300));
    containment::require_image(manager, &config)
        .await
        .expect("base image should be pullable");
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_pull_makes_image_present() {
    let manager = BollardDockerManager::connect().expect("docker should be reachable");

    ensure_base_image(&manager).await;

    assert!(manager.image_exists_locally(BASE_IMAGE).await.unwrap());
    assert!(!manager
        .image_exists_locally("containment-test/definitely-absent:never")
        .await
        .unwrap());
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_build_from_dockerfile_directory() {
    let manager = BollardDockerManager::connect().expect("docker should be reachable");
    ensure_base_image(&manager).await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("Dockerfile"),
        format!("FROM {BASE_IMAGE}\nCOPY hello.txt /hello.txt\n"),
    )
    .unwrap();
    std::fs::write(dir.path().join("hello.txt"), "hello\n").unwrap();

    let name = "containment-test/built:latest";
    let config = RequireImageConfig::new(name)
        .with_directive(
            AbsentImageDirective::new(AbsentImageAction::Build)
                .with_parameter(dir.path().to_string_lossy()),
        )
        .with_label("containment.test", "true")
        .with_build_timeout(Duration::from_secs(300));

    containment::require_image(&manager, &config).await.unwrap();

    assert!(manager.image_exists_locally(name).await.unwrap());
    let _ = manager
        .docker()
        .remove_image(name, None, None)
        .await;
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_fail_directive_on_absent_image() {
    let manager = BollardDockerManager::connect().expect("docker should be reachable");
    let config = RequireImageConfig::new("containment-test/definitely-absent:never")
        .with_directive(AbsentImageDirective::new(AbsentImageAction::Fail));

    let result = containment::require_image(&manager, &config).await;

    assert!(matches!(result, Err(ContainmentError::RequiredImageAbsent(_))));
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_exec_attached_and_detached() {
    let manager = BollardDockerManager::connect().expect("docker should be reachable");
    ensure_base_image(&manager).await;
    let runner = ContainerRunner::connect().unwrap();
    let container = runner
        .run(&ContainerSpec::new(BASE_IMAGE).with_command(["sleep", "120"]))
        .await
        .unwrap();

    let attached = container.executor(ExecConfig::default());
    let result = attached
        .execute("sh", &["-c".to_string(), "echo hi; echo err >&2".to_string()])
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout.as_deref(), Some("hi\n"));
    assert_eq!(result.stderr.as_deref(), Some("err\n"));

    let detached = container.detached_executor(
        ExecConfig::default().with_polling(Duration::from_millis(200), 50),
    );
    let result = detached
        .execute("sh", &["-c".to_string(), "sleep 1; exit 3".to_string()])
        .await
        .unwrap();
    assert_eq!(result.exit_code, 3);
    assert!(result.stdout.is_none());

    container.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_copy_in_and_out() {
    let manager = BollardDockerManager::connect().expect("docker should be reachable");
    ensure_base_image(&manager).await;
    let container = ContainerRunner::connect()
        .unwrap()
        .run(&ContainerSpec::new(BASE_IMAGE).with_command(["sleep", "120"]))
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("payload.txt");
    std::fs::write(&source, "payload\n").unwrap();
    container.copy_to(&source, "/tmp").await.unwrap();

    let result = container
        .executor(ExecConfig::default())
        .execute("cat", &["/tmp/payload.txt".to_string()])
        .await
        .unwrap();
    assert_eq!(result.stdout.as_deref(), Some("payload\n"));

    let copied = dir.path().join("copied.txt");
    container.copy_from("/tmp/payload.txt", &copied).await.unwrap();
    assert_eq!(std::fs::read_to_string(&copied).unwrap(), "payload\n");

    container.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_exposed_port_is_published() {
    let manager = BollardDockerManager::connect().expect("docker should be reachable");
    ensure_base_image(&manager).await;
    let spec = ContainerSpec::new(BASE_IMAGE)
        .with_command(["httpd", "-f", "-p", "8080"])
        .expose(8080)
        .unwrap();
    let container = ContainerRunner::connect().unwrap().run(&spec).await.unwrap();

    let ports = container.fetch_ports().await.unwrap();

    let published = ports
        .iter()
        .find(|p| p.container_port == 8080 && p.host.is_some())
        .expect("port 8080 should be published");
    assert_eq!(published.protocol, "tcp");
    assert!(published.host.as_ref().unwrap().port > 0);

    container.close().await.unwrap();
}
