use crate::{
    Address, CallFuture, Callback, Client, Controller, ErrorKind, EventLoop, Method, RpcService, Server,
    config::{ClientConfig, ServerConfig},
    diagnostics::{
        self, Diagnostics, DiagnosticsState, DiagnosticsStub, Echo, EchoMessage, SumRequest,
    },
};
use std::{
    net::{SocketAddr, TcpListener},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

fn start_server(delay: Duration) -> (Server, Arc<DiagnosticsState>) {
    start_server_on("127.0.0.1:0", delay)
}

fn start_server_on(listen: &str, delay: Duration) -> (Server, Arc<DiagnosticsState>) {
    let service = diagnostics::service(DiagnosticsState::new(delay));
    let state = service.state().clone();
    let server = Server::bind(service, ServerConfig::default().listen(listen)).unwrap();
    server.start().unwrap();
    (server, state)
}

fn client_config() -> ClientConfig {
    ClientConfig::default()
        .retries(2)
        .connect_timeout(Duration::from_millis(500))
        .retry_backoff(Duration::from_millis(20))
}

fn connect(server: &Server, event_loop: &EventLoop) -> Client<Diagnostics> {
    Client::new(server.listen_address().into(), event_loop, client_config()).unwrap()
}

/// A local port with nothing listening on it.
fn vacant_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[test]
fn sum_over_the_wire() {
    init_tracing();
    let (server, _) = start_server(Duration::ZERO);
    let event_loop = EventLoop::new("sum", 2).unwrap();
    let client = connect(&server, &event_loop);
    let stub = DiagnosticsStub::from(client.stub());

    let future = CallFuture::new();
    let request = SumRequest {
        x1: 1,
        x2: 2,
        x3: 3.15,
        x4: 2.0,
    };
    stub.sum(future.controller(), &request, future.clone());
    let response = future.get().unwrap();
    assert!((response.result - 8.15).abs() < 1e-9);
    assert!(!future.controller().failed());
    assert_eq!(future.controller().error_text(), None);

    drop(client);
    server.shutdown();
    event_loop.shutdown();
}

#[test]
fn echo_through_a_callback() {
    init_tracing();
    let (server, _) = start_server(Duration::ZERO);
    let event_loop = EventLoop::new("echo", 2).unwrap();
    let client = connect(&server, &event_loop);
    let stub = DiagnosticsStub::from(client.stub());

    let (tx, rx) = mpsc::channel();
    let controller = Controller::new();
    stub.echo(
        &controller,
        &EchoMessage::new("hello tessera"),
        move |response: Option<EchoMessage>, controller: &Controller| {
            tx.send((response, controller.failed())).unwrap();
        },
    );
    let (response, failed) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(response, Some(EchoMessage::new("hello tessera")));
    assert!(!failed);
    assert!(controller.is_done());

    drop(client);
    server.shutdown();
    event_loop.shutdown();
}

#[test]
fn null_response_is_not_a_failure() {
    init_tracing();
    let (server, state) = start_server(Duration::ZERO);
    let event_loop = EventLoop::new("null", 1).unwrap();
    let client = connect(&server, &event_loop);
    let stub = DiagnosticsStub::from(client.stub());

    let future = CallFuture::new();
    stub.get_null(future.controller(), &EchoMessage::new("anything"), future.clone());
    assert_eq!(future.get(), None);
    assert!(future.controller().is_done());
    assert!(!future.controller().failed());
    assert!(state.get_null_called());

    drop(client);
    server.shutdown();
    event_loop.shutdown();
}

#[test]
fn deferred_reply_from_another_thread() {
    init_tracing();
    let (server, _) = start_server(Duration::from_millis(200));
    let event_loop = EventLoop::new("delay", 1).unwrap();
    let client = connect(&server, &event_loop);
    let stub = DiagnosticsStub::from(client.stub());

    let started = Instant::now();
    let future = CallFuture::new();
    stub.delay(future.controller(), &EchoMessage::new("later"), future.clone());
    assert_eq!(future.get().map(|m| m.message).as_deref(), Some("later"));
    assert!(started.elapsed() >= Duration::from_millis(200));

    drop(client);
    server.shutdown();
    event_loop.shutdown();
}

#[test]
fn late_response_after_timeout_still_lands() {
    init_tracing();
    let (server, _) = start_server(Duration::from_millis(300));
    let event_loop = EventLoop::new("timeout", 1).unwrap();
    let client = connect(&server, &event_loop);
    let stub = DiagnosticsStub::from(client.stub());

    let fired = Arc::new(AtomicUsize::new(0));
    let future = CallFuture::new();
    let counted = future.clone();
    let done = {
        let fired = fired.clone();
        move |response: Option<EchoMessage>, controller: &Controller| {
            fired.fetch_add(1, Ordering::SeqCst);
            counted.run(response, controller);
        }
    };
    stub.delay(future.controller(), &EchoMessage::new("slow"), done);
    let err = future.get_timeout(Duration::from_millis(50)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(!future.controller().is_done());
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    assert_eq!(future.get().map(|m| m.message).as_deref(), Some("slow"));
    assert!(future.controller().is_done());
    assert!(!future.controller().failed());
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    drop(client);
    server.shutdown();
    event_loop.shutdown();
}

#[test]
fn server_shutdown_fails_outstanding_calls() {
    init_tracing();
    let (server, _) = start_server(Duration::from_secs(2));
    let event_loop = EventLoop::new("shutdown", 1).unwrap();
    let client = connect(&server, &event_loop);
    let stub = DiagnosticsStub::from(client.stub());

    let futures: Vec<CallFuture<EchoMessage>> = (0..3)
        .map(|i| {
            let future = CallFuture::new();
            stub.delay(future.controller(), &EchoMessage::new(format!("call {i}")), future.clone());
            future
        })
        .collect();
    thread::sleep(Duration::from_millis(100));
    server.shutdown();

    for future in &futures {
        assert_eq!(future.get_timeout(WAIT).unwrap(), None);
        assert!(future.controller().failed());
        assert_eq!(future.controller().error_kind(), Some(ErrorKind::ConnectionLost));
        assert!(!future.controller().error_text().unwrap().is_empty());
    }
    assert_eq!(client.pending_calls(), 0);

    drop(client);
    event_loop.shutdown();
}

#[test]
fn closed_connection_fails_calls_until_refreshed() {
    init_tracing();
    let (server, _) = start_server(Duration::ZERO);
    let event_loop = EventLoop::new("refresh", 1).unwrap();
    let client = connect(&server, &event_loop);
    client.close();
    assert!(!client.is_connected());

    let stale = DiagnosticsStub::from(client.stub());
    let future = CallFuture::new();
    stale.echo(future.controller(), &EchoMessage::new("lost"), future.clone());
    assert!(future.is_done());
    assert_eq!(future.get(), None);
    assert_eq!(future.controller().error_kind(), Some(ErrorKind::ConnectionLost));

    let fresh = DiagnosticsStub::from(client.refresh_stub().unwrap());
    assert!(fresh.is_connected());
    assert!(!stale.is_connected());
    let future = CallFuture::new();
    fresh.echo(future.controller(), &EchoMessage::new("back"), future.clone());
    assert_eq!(future.get().map(|m| m.message).as_deref(), Some("back"));

    drop(client);
    server.shutdown();
    event_loop.shutdown();
}

#[test]
fn concurrent_refreshes_share_one_connection() {
    init_tracing();
    let (server, _) = start_server(Duration::ZERO);
    let event_loop = EventLoop::new("refresh-race", 2).unwrap();
    let client = Arc::new(connect(&server, &event_loop));

    for _ in 0..5 {
        client.close();
        let refreshers: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                thread::spawn(move || DiagnosticsStub::from(client.refresh_stub().unwrap()))
            })
            .collect();
        let stubs: Vec<_> = refreshers.into_iter().map(|t| t.join().unwrap()).collect();
        for stub in &stubs {
            assert!(stub.is_connected());
            let future = CallFuture::new();
            stub.echo(future.controller(), &EchoMessage::new("raced"), future.clone());
            assert_eq!(future.get_timeout(WAIT).unwrap(), Some(EchoMessage::new("raced")));
        }
    }

    drop(client);
    server.shutdown();
    event_loop.shutdown();
}

#[test]
fn connect_retries_until_the_server_is_up() {
    init_tracing();
    let listen = vacant_port();
    let starter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        start_server_on(&listen.to_string(), Duration::ZERO).0
    });

    let event_loop = EventLoop::new("retry", 1).unwrap();
    let config = client_config()
        .retries(20)
        .retry_backoff(Duration::from_millis(100));
    let client = Client::<Diagnostics>::new(listen.into(), &event_loop, config).unwrap();
    let server = starter.join().unwrap();

    let stub = DiagnosticsStub::from(client.stub());
    let future = CallFuture::new();
    stub.echo(future.controller(), &EchoMessage::new("hello"), future.clone());
    assert_eq!(future.get(), Some(EchoMessage::new("hello")));

    drop(client);
    server.shutdown();
    event_loop.shutdown();
}

#[test]
fn refused_connection_gives_up_after_retries() {
    init_tracing();
    let event_loop = EventLoop::new("refused", 1).unwrap();
    let started = Instant::now();
    let err = Client::<Diagnostics>::new(vacant_port().into(), &event_loop, client_config()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectTimeout);
    match err {
        crate::Error::ConnectTimeout { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error {other}"),
    }
    assert!(started.elapsed() < WAIT);
    event_loop.shutdown();
}

#[test]
fn unresolvable_host_is_reported() {
    init_tracing();
    let event_loop = EventLoop::new("unresolved", 1).unwrap();
    let address = Address::unresolved("no-such-host.invalid:7000").unwrap();
    let err = Client::<Diagnostics>::new(address, &event_loop, client_config().retries(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnresolvedAddress);
    event_loop.shutdown();
}

#[test]
fn concurrent_calls_pair_with_their_responses() {
    init_tracing();
    let (server, _) = start_server(Duration::from_millis(150));
    let event_loop = EventLoop::new("concurrent", 2).unwrap();
    let client = connect(&server, &event_loop);
    let fired = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let stub = DiagnosticsStub::from(client.stub());
            let fired = fired.clone();
            thread::spawn(move || {
                let calls: Vec<_> = (0..25)
                    .map(|i| {
                        let message = EchoMessage::new(format!("{worker}-{i}"));
                        let future = CallFuture::new();
                        let counted = future.clone();
                        let fired = fired.clone();
                        let done = move |response: Option<EchoMessage>, controller: &Controller| {
                            fired.fetch_add(1, Ordering::SeqCst);
                            counted.run(response, controller);
                        };
                        // Every fifth call is slow so completions interleave.
                        if i % 5 == 0 {
                            stub.delay(future.controller(), &message, done);
                        } else {
                            stub.echo(future.controller(), &message, done);
                        }
                        (message, future)
                    })
                    .collect();
                for (message, future) in calls {
                    assert_eq!(future.get_timeout(WAIT).unwrap(), Some(message));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(fired.load(Ordering::SeqCst), 100);
    assert_eq!(client.pending_calls(), 0);

    drop(client);
    server.shutdown();
    event_loop.shutdown();
}

#[test]
fn dispatch_errors_keep_the_connection_open() {
    init_tracing();
    let service = RpcService::<Diagnostics>::new().register::<Echo>(|_, request, reply| reply.send(request));
    let server = Server::bind(service, ServerConfig::default()).unwrap();
    server.start().unwrap();
    let event_loop = EventLoop::new("dispatch", 1).unwrap();
    let client = connect(&server, &event_loop);
    let stub = DiagnosticsStub::from(client.stub());

    let missing = CallFuture::new();
    stub.sum(
        missing.controller(),
        &SumRequest {
            x1: 0,
            x2: 0,
            x3: 0.0,
            x4: 0.0,
        },
        missing.clone(),
    );
    assert_eq!(missing.get(), None);
    assert_eq!(missing.controller().error_kind(), Some(ErrorKind::MethodNotFound));
    assert!(missing.controller().error_text().unwrap().contains("sum"));

    struct TruncatedEcho;
    impl Method for TruncatedEcho {
        type Service = Diagnostics;
        type Request = u8;
        type Response = EchoMessage;

        const ID: u32 = Echo::ID;
        const NAME: &'static str = "echo";
    }
    let malformed = client.stub().call_future::<TruncatedEcho>(&7);
    assert_eq!(malformed.get(), None);
    assert_eq!(
        malformed.controller().error_kind(),
        Some(ErrorKind::MalformedRequest)
    );

    let echoed = client.stub().call_future::<Echo>(&EchoMessage::new("still here"));
    assert_eq!(echoed.get(), Some(EchoMessage::new("still here")));
    assert!(client.is_connected());

    drop(client);
    server.shutdown();
    event_loop.shutdown();
}

#[test]
fn panicking_service_fails_only_its_call() {
    init_tracing();
    let service = RpcService::<Diagnostics>::new().register::<Echo>(|_, request: EchoMessage, reply| {
        if request.message == "boom" {
            panic!("cannot echo `{}`", request.message);
        }
        reply.send(request)
    });
    let server = Server::bind(service, ServerConfig::default()).unwrap();
    server.start().unwrap();
    let event_loop = EventLoop::new("panic", 1).unwrap();
    let client = connect(&server, &event_loop);
    let stub = DiagnosticsStub::from(client.stub());

    let failed = CallFuture::new();
    stub.echo(failed.controller(), &EchoMessage::new("boom"), failed.clone());
    assert_eq!(failed.get_timeout(WAIT).unwrap(), None);
    assert_eq!(failed.controller().error_kind(), Some(ErrorKind::Application));
    assert!(failed.controller().error_text().unwrap().contains("panicked"));

    let after = CallFuture::new();
    stub.echo(after.controller(), &EchoMessage::new("after"), after.clone());
    assert_eq!(after.get_timeout(WAIT).unwrap(), Some(EchoMessage::new("after")));
    assert!(client.is_connected());
    assert_eq!(server.connections(), 1);

    drop(client);
    server.shutdown();
    event_loop.shutdown();
}

#[test]
fn panicking_callback_drains_its_connection() {
    init_tracing();
    let (server, _) = start_server(Duration::from_millis(300));
    let event_loop = EventLoop::new("callback-panic", 1).unwrap();
    let client = connect(&server, &event_loop);
    let stub = DiagnosticsStub::from(client.stub());

    let slow = CallFuture::new();
    stub.delay(slow.controller(), &EchoMessage::new("slow"), slow.clone());
    stub.echo(
        &Controller::new(),
        &EchoMessage::new("fast"),
        |response: Option<EchoMessage>, _: &Controller| {
            if response.is_some() {
                panic!("callback failed");
            }
        },
    );

    assert_eq!(slow.get_timeout(WAIT).unwrap(), None);
    assert_eq!(slow.controller().error_kind(), Some(ErrorKind::ConnectionLost));
    assert!(!client.is_connected());
    assert_eq!(client.pending_calls(), 0);

    let fresh = DiagnosticsStub::from(client.refresh_stub().unwrap());
    let future = CallFuture::new();
    fresh.echo(future.controller(), &EchoMessage::new("recovered"), future.clone());
    assert_eq!(future.get_timeout(WAIT).unwrap(), Some(EchoMessage::new("recovered")));

    drop(client);
    server.shutdown();
    event_loop.shutdown();
}

#[test]
fn application_error_reaches_the_caller() {
    init_tracing();
    let (server, _) = start_server(Duration::ZERO);
    let event_loop = EventLoop::new("fail", 1).unwrap();
    let client = connect(&server, &event_loop);
    let stub = DiagnosticsStub::from(client.stub());

    let future = CallFuture::new();
    stub.fail(future.controller(), &EchoMessage::new("question"), future.clone());
    assert_eq!(future.get(), None);
    assert_eq!(future.controller().error_kind(), Some(ErrorKind::Application));
    assert_eq!(
        future.controller().error_text().as_deref(),
        Some("refused to answer `question`")
    );

    drop(client);
    server.shutdown();
    event_loop.shutdown();
}

#[test]
fn async_client_inside_a_runtime() {
    init_tracing();
    let (server, _) = start_server(Duration::from_millis(50));
    let event_loop = EventLoop::new("async", 2).unwrap();
    let address: Address = server.listen_address().into();

    let echoed = event_loop.block_on(async {
        let client = Client::<Diagnostics>::connect_async(address, &event_loop, client_config())
            .await
            .unwrap();
        let stub = DiagnosticsStub::from(client.refresh_stub_async().await.unwrap());
        let future = CallFuture::new();
        stub.delay(future.controller(), &EchoMessage::new("awaited"), future.clone());
        future.wait().await
    });
    assert_eq!(echoed, Some(EchoMessage::new("awaited")));

    server.shutdown();
    event_loop.shutdown();
}
