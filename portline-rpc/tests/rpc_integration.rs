//! End-to-end RPC scenarios: a server exporting a few callables, a client
//! calling them through the proxy namespace built from the `register`
//! message.

use portline::Address;
use portline_rpc::{decode_proxy, encode_callback, serve, Client, Export};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

fn exports() -> Vec<Export> {
    vec![
        Export::new(
            "add",
            Arc::new(|_port, args| {
                let a = args.first().and_then(|v| v.as_int()).ok_or("add: missing first arg")?;
                let b = args.get(1).and_then(|v| v.as_int()).ok_or("add: missing second arg")?;
                Ok((a + b).into())
            }),
        )
        .quick(),
        Export::new(
            "boom",
            Arc::new(|_port, _args| Err::<portline::Value, String>("boom: deliberate failure".to_owned())),
        ),
        Export::new(
            "notify",
            {
                let calls: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
                Arc::new(move |_port, _args| {
                    *calls.lock().unwrap() += 1;
                    Ok(portline::Value::Null)
                })
            },
        )
        .no_reply(),
        Export::new(
            "run",
            Arc::new(|port, mut args| {
                let portline::Value::Proxy(pkg) = args.remove(0) else {
                    return Err("run: expected a callback proxy as the first argument".to_owned());
                };
                let cb = decode_proxy(port, pkg);
                cb.call(vec![42i64.into()]).map_err(|e| e.to_string())
            }),
        ),
    ]
}

#[test]
fn hello_world_call_returns_the_right_value() {
    let server = serve(Address::parse("127.0.0.1:0"), 4, exports).unwrap();
    let addr = Address::parse(&server.local_addr());

    let client = Client::connect(&addr).unwrap();
    let proxies = client.proxies(Duration::from_secs(2)).expect("register message should arrive");
    let add = proxies.get("add").expect("server exports an 'add' proxy");

    let result = add.call(vec![3i64.into(), 4i64.into()]).unwrap();
    assert_eq!(result, portline::Value::Int(7));

    client.close();
    server.stop();
}

#[test]
fn remote_exception_is_reported_as_an_rpc_error() {
    let server = serve(Address::parse("127.0.0.1:0"), 4, exports).unwrap();
    let addr = Address::parse(&server.local_addr());

    let client = Client::connect(&addr).unwrap();
    let proxies = client.proxies(Duration::from_secs(2)).unwrap();
    let boom = proxies.get("boom").unwrap();

    let err = boom.call(vec![]).unwrap_err();
    match err {
        portline_rpc::RpcError::Remote(msg) => assert!(msg.contains("deliberate failure")),
        other => panic!("expected a Remote error, got {other:?}"),
    }

    client.close();
    server.stop();
}

#[test]
fn no_reply_export_returns_immediately_without_a_round_trip() {
    let server = serve(Address::parse("127.0.0.1:0"), 4, exports).unwrap();
    let addr = Address::parse(&server.local_addr());

    let client = Client::connect(&addr).unwrap();
    let proxies = client.proxies(Duration::from_secs(2)).unwrap();
    let notify = proxies.get("notify").unwrap();

    let result = notify.call(vec![]).unwrap();
    assert_eq!(result, portline::Value::Null);

    client.close();
    server.stop();
}

#[test]
fn calling_an_unknown_proxy_id_is_reported_as_no_such_proxy() {
    let server = serve(Address::parse("127.0.0.1:0"), 4, exports).unwrap();
    let addr = Address::parse(&server.local_addr());

    let client = Client::connect(&addr).unwrap();
    let proxies = client.proxies(Duration::from_secs(2)).unwrap();
    // Build a handle pointing at a proxy id nothing ever registered.
    let bogus = portline_rpc::decode_proxy(client.port(), portline::ProxyPackage { proxy_id: 999_999, no_reply: false });

    let err = bogus.call(vec![]).unwrap_err();
    match err {
        portline_rpc::RpcError::Remote(msg) => assert!(msg.contains("no such proxy")),
        other => panic!("expected a Remote error naming the missing proxy, got {other:?}"),
    }

    client.close();
    server.stop();
}

#[test]
fn callback_passed_as_call_argument_is_invoked_and_then_unreffed() {
    let server = serve(Address::parse("127.0.0.1:0"), 4, exports).unwrap();
    let addr = Address::parse(&server.local_addr());

    let client = Client::connect(&addr).unwrap();
    let proxies = client.proxies(Duration::from_secs(2)).unwrap();
    let run = proxies.get("run").unwrap();

    let (tx, rx) = mpsc::channel();
    let cb = encode_callback(
        Arc::new(move |_port, args| {
            tx.send(args.into_iter().next().unwrap()).unwrap();
            Ok(portline::Value::Null)
        }),
        false,
    );
    let portline::Value::Proxy(cb_pkg) = cb else {
        panic!("encode_callback should produce a Value::Proxy");
    };

    let result = run.call(vec![portline::Value::Proxy(cb_pkg)]);
    assert_eq!(result.unwrap(), portline::Value::Null);

    let observed = rx.recv_timeout(Duration::from_secs(2)).expect("server should have invoked the callback");
    assert_eq!(observed, portline::Value::Int(42));

    // The server's decoded handle for the callback was dropped when `run`
    // returned, sending `unref`; the client's registration for it should
    // disappear shortly after.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while portline_rpc::backend().contains(cb_pkg.proxy_id) {
        if std::time::Instant::now() > deadline {
            panic!("callback proxy was never unreffed");
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    client.close();
    server.stop();
}
