use crate::{
    cli::{Cli, EchoArgs, ServeArgs, SumArgs, echo, start_server, sum},
    config::server_config,
};
use clap::Parser;
use tessera_rpc::config::RpcConfig;

fn serve_args() -> ServeArgs {
    ServeArgs {
        listen: Some("127.0.0.1:0".to_string()),
        workers: Some(1),
        delay_ms: 10,
    }
}

#[test]
fn parses_subcommands() {
    let cli = Cli::try_parse_from(["tessera", "sum", "127.0.0.1:7000", "1", "-2", "3.15", "2.0"]).unwrap();
    match cli {
        Cli::Sum(args) => {
            assert_eq!(args.addr, "127.0.0.1:7000");
            assert_eq!((args.x1, args.x2), (1, -2));
            assert_eq!(args.timeout_ms, 5000);
        }
        _ => panic!("expected sum"),
    }

    let cli = Cli::try_parse_from(["tessera", "serve", "--listen", "0.0.0.0:9000", "--workers", "4"]).unwrap();
    match cli {
        Cli::Serve(args) => {
            let config = server_config(&RpcConfig::default(), args.listen, args.workers);
            assert_eq!(config.listen, "0.0.0.0:9000");
            assert_eq!(config.workers, 4);
        }
        _ => panic!("expected serve"),
    }

    assert!(Cli::try_parse_from(["tessera", "echo", "127.0.0.1:7000"]).is_err());
}

#[test]
fn flags_leave_unset_values_alone() {
    let config = server_config(&RpcConfig::default(), None, None);
    assert_eq!(config.listen, "127.0.0.1:0");
    assert_eq!(config.workers, 2);
}

#[test]
fn echo_and_sum_against_a_local_server() {
    let config = RpcConfig::default();
    let server = start_server(serve_args(), &config).unwrap();
    let addr = server.listen_address().to_string();

    let echoed = echo(
        EchoArgs {
            addr: addr.clone(),
            message: "ping".to_string(),
            timeout_ms: 5000,
        },
        &config,
    )
    .unwrap();
    assert_eq!(echoed, "ping");

    let total = sum(
        SumArgs {
            addr,
            x1: 1,
            x2: 2,
            x3: 3.15,
            x4: 2.0,
            timeout_ms: 5000,
        },
        &config,
    )
    .unwrap();
    assert!((total - 8.15).abs() < 1e-9);

    server.shutdown();
}

#[test]
fn unreachable_peer_is_an_error() {
    let mut config = RpcConfig::default();
    config.client = config
        .client
        .retries(0)
        .connect_timeout(std::time::Duration::from_millis(200));
    let vacant = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let err = echo(
        EchoArgs {
            addr: vacant.to_string(),
            message: "anyone?".to_string(),
            timeout_ms: 1000,
        },
        &config,
    )
    .unwrap_err();
    assert!(err.to_string().contains("could not connect"));
}
