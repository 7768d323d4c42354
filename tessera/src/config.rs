use tessera_rpc::config::{RpcConfig, ServerConfig};

/// Base name of the optional config file (`tessera.toml`, `tessera.yaml`, ...).
pub const CONFIG_NAME: &str = "tessera";

pub fn init_config() -> anyhow::Result<RpcConfig> {
    Ok(RpcConfig::load(CONFIG_NAME)?)
}

/// Command line flags win over the config file and environment.
pub fn server_config(config: &RpcConfig, listen: Option<String>, workers: Option<usize>) -> ServerConfig {
    let mut server = config.server.clone();
    if let Some(listen) = listen {
        server = server.listen(listen);
    }
    if let Some(workers) = workers {
        server = server.workers(workers);
    }
    server
}
