use pretty_assertions::assert_eq;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;

use steplink_core::prelude::*;

const CONFIG: &str = r#"{
    "ports": [
        { "name": "bus0", "path": "/dev/ttyUSB0", "read_timeout_ms": 250 }
    ],
    "controllers": [
        { "name": "motorController1", "port": "bus0", "address": 1 },
        { "name": "motorController2", "port": "bus0", "address": 2 }
    ]
}"#;

#[test]
fn test_bridge_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bridge.json");
    std::fs::write(&path, CONFIG).unwrap();

    let config = BridgeConfig::from_file(&path).unwrap();
    assert_eq!(config.ports[0].line.read_timeout_ms, 250);

    let mut peer = None;
    let bridge = Bridge::with_opener(&config, |port| {
        let (ours, theirs) = UnixStream::pair().unwrap();
        peer = Some(theirs);
        Channel::from_link(Box::new(ours), port.line.clone())
    })
    .unwrap();
    let mut peer = peer.unwrap();

    let responder = thread::spawn(move || {
        for (request, reply) in [("#1C\r", "1C+10\r"), ("#2C\r", "2C-20\r"), ("#2A\r", "2A\r")] {
            let mut buf = vec![0u8; request.len()];
            peer.read_exact(&mut buf).unwrap();
            assert_eq!(String::from_utf8(buf).unwrap(), request);
            peer.write_all(reply.as_bytes()).unwrap();
        }
    });

    let first = bridge.controller("motorController1").unwrap();
    let second = bridge.controller("motorController2").unwrap();
    assert_eq!(first.position().unwrap(), 10);
    assert_eq!(second.position().unwrap(), -20);
    assert_eq!(second.start().unwrap(), "2A");
    responder.join().unwrap();

    assert_eq!(
        bridge.channel("bus0").unwrap().lock().unwrap().config().read_timeout_ms,
        250
    );
    bridge.close();
    assert!(matches!(first.status(), Err(ProtocolError::BadHandle)));
}

#[test]
fn test_bridge_rejects_invalid_config() {
    let config = BridgeConfig {
        ports: vec![],
        controllers: vec![],
    };
    let result = Bridge::with_opener(&config, |_| unreachable!("no ports to open"));
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[tokio::test]
async fn test_async_controller_reads_current_set() {
    let (ours, mut theirs) = UnixStream::pair().unwrap();
    let channel = Channel::from_link(Box::new(ours), ChannelConfig::default())
        .unwrap()
        .into_shared();

    let responder = thread::spawn(move || {
        let mut buf = [0u8; 5];
        theirs.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"#3Z|\r");
        theirs
            .write_all(b"3Zp+2s+800u+100o+2000n+2000b+1000B+0d+1t+0W+3P+10N+0\r")
            .unwrap();
        theirs
    });

    let motor = AsyncController::new(Controller::new(channel, Address::new(3).unwrap()));
    let record = motor.current_set().await.unwrap();
    assert_eq!(record.position_mode(), Some("absolute pos. mode"));
    assert_eq!(record.by_name("repeats"), Some(3));
    assert_eq!(record.by_name("pause"), Some(10));
    responder.join().unwrap();
}
