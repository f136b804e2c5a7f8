use datainfrapilot_backend::config::Config;
use uuid::Uuid;

#[tokio::test]
async fn test_config_loads_with_defaults() {
    let config = Config::load().unwrap();

    assert!(!config.server_address.is_empty());
    assert!(!config.database_url.is_empty());
    assert!(!config.helm_bin.is_empty());
    assert!(!config.kubectl_bin.is_empty());

    assert!(config.provider_timeout.as_secs() >= 1);
    assert!(config.helm_timeout.as_secs() >= config.provider_timeout.as_secs());
}

#[tokio::test]
async fn test_kubeconfig_path_is_per_cluster() {
    let config = Config::load().unwrap();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let path_a = config.kubeconfig_path(a);
    let path_b = config.kubeconfig_path(b);

    assert_ne!(path_a, path_b);
    assert!(path_a.to_string_lossy().contains(&a.to_string()));
    assert!(path_a.to_string_lossy().ends_with(".yaml"));
}
