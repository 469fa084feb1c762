mod common;

use std::thread;
use std::time::Duration;

use espapi_client::ClientError;
use espapi_frame::{proto, Message, MessageKind};

use common::{dial, sensor, wait_until, FakeDevice, PASSWORD};

fn device_info(name: &str) -> proto::DeviceInfoResponse {
    proto::DeviceInfoResponse {
        name: name.into(),
        ..Default::default()
    }
}

#[test]
fn close_says_goodbye_once() {
    let device = FakeDevice::spawn(|side| {
        side.serve_login(&[]);
        let _: proto::DisconnectRequest = side.expect();
        side.send(proto::DisconnectResponse {});
        side.drain();
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");
    client.close().expect("close should complete the exchange");
    client.close().expect("closing twice should not be an error");

    assert!(client.connection().is_closed());
    let err = client.ping().expect_err("ping after close should fail");
    assert!(matches!(err, ClientError::Connection(reason) if reason == "connection closed"));

    device.join();
}

#[test]
fn device_hangup_is_sticky() {
    let device = FakeDevice::spawn(|side| {
        side.serve_login(&[]);
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");
    device.join();

    assert!(wait_until(Duration::from_secs(3), || client
        .connection()
        .terminal_error()
        .is_some()));

    for _ in 0..2 {
        let err = client.device_info().expect_err("dead connection should fail");
        assert!(matches!(err, ClientError::Connection(_)), "got {err:?}");
    }
    assert!(matches!(
        client.connection().register_wait(MessageKind::PingResponse),
        Err(ClientError::Connection(_))
    ));
    assert!(matches!(
        client.next_message_timeout(Duration::from_millis(10)),
        Err(ClientError::Connection(_))
    ));
    client.connection().join();
}

#[test]
fn device_disconnect_request_is_acknowledged() {
    let device = FakeDevice::spawn(|side| {
        side.serve_login(&[]);
        side.send(proto::DisconnectRequest {});
        let _: proto::DisconnectResponse = side.expect();
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");
    device.join();

    assert!(wait_until(Duration::from_secs(3), || client
        .connection()
        .is_closed()));
    let err = client
        .connection()
        .terminal_error()
        .expect("terminal error should be stored");
    assert!(matches!(err, ClientError::Connection(reason) if reason == "closed by device"));
}

#[test]
fn garbage_from_device_is_a_protocol_error() {
    let device = FakeDevice::spawn(|side| {
        side.serve_login(&[]);
        let _: proto::DeviceInfoRequest = side.expect();
        // Not a frame marker.
        side.send_raw(&[0x01, 0x02, 0x03]);
        side.drain();
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");
    let err = client.device_info().expect_err("malformed reply should fail");
    assert!(matches!(err, ClientError::Protocol(_)), "got {err:?}");
    assert!(matches!(client.ping(), Err(ClientError::Protocol(_))));

    drop(client);
    device.join();
}

#[test]
fn newer_waiter_displaces_older_one() {
    let device = FakeDevice::spawn(|side| {
        side.serve_login(&[]);
        let _: proto::PingRequest = side.expect();
        side.send(device_info("only"));
        side.drain();
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");
    let connection = client.connection();

    let first = connection
        .register_wait(MessageKind::DeviceInfoResponse)
        .expect("first registration should succeed");
    let second = connection
        .register_wait(MessageKind::DeviceInfoResponse)
        .expect("second registration should succeed");

    let first = thread::spawn(move || first.recv_timeout(Duration::from_secs(3)));
    client.ping().expect("ping should send");

    let reply = second
        .recv_timeout(Duration::from_secs(3))
        .expect("newest waiter should get the reply");
    assert_eq!(reply, Message::from(device_info("only")));

    let displaced = first.join().expect("waiter thread should not panic");
    assert!(matches!(
        displaced,
        Err(ClientError::Cancelled(MessageKind::DeviceInfoResponse))
    ));

    drop(client);
    device.join();
}

#[test]
fn timed_out_request_leaves_no_residual_waiter() {
    let device = FakeDevice::spawn(|side| {
        side.serve_login(&[]);
        let _: proto::DeviceInfoRequest = side.expect();
        thread::sleep(Duration::from_millis(300));
        side.send(device_info("late"));

        let _: proto::DeviceInfoRequest = side.expect();
        side.send(device_info("fresh"));
        side.drain();
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");
    let connection = client.connection();

    let err = connection
        .request_response(
            proto::DeviceInfoRequest {},
            MessageKind::DeviceInfoResponse,
            Duration::from_millis(100),
        )
        .expect_err("nobody answers in time");
    assert!(err.is_timeout());

    // The late reply finds no waiter and is queued.
    let late = client
        .next_message_timeout(Duration::from_secs(3))
        .expect("late reply should be queued");
    assert_eq!(late, Message::from(device_info("late")));

    let fresh: proto::DeviceInfoResponse = connection
        .request(proto::DeviceInfoRequest {})
        .expect("second request should get its own reply");
    assert_eq!(fresh.name, "fresh");

    drop(client);
    device.join();
}

#[test]
fn concurrent_requests_for_the_same_kind_take_turns() {
    let device = FakeDevice::spawn(|side| {
        side.serve_login(&[]);
        for name in ["one", "two"] {
            let _: proto::DeviceInfoRequest = side.expect();
            thread::sleep(Duration::from_millis(50));
            side.send(device_info(name));
        }
        side.drain();
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");

    let names: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| scope.spawn(|| client.device_info().map(|info| info.name)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .expect("request thread should not panic")
                    .expect("both requests should succeed")
            })
            .collect()
    });

    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(sorted, vec!["one".to_string(), "two".to_string()]);

    drop(client);
    device.join();
}

#[test]
fn panicking_subscriber_leaves_the_connection_usable() {
    let device = FakeDevice::spawn(|side| {
        side.serve_login(&[sensor(1, "temperature")]);
        let _: proto::PingRequest = side.expect();
        side.send(proto::SensorStateResponse {
            key: 1,
            state: 19.0,
            missing_state: false,
        });
        let _: proto::DeviceInfoRequest = side.expect();
        side.send(device_info("porch"));
        side.drain();
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");
    let temperature = client
        .entities()
        .sensor("temperature")
        .expect("sensor should exist");
    let _subscription = temperature.subscribe(|_| panic!("subscriber bug"));
    client.ping().expect("ping should send");

    assert!(wait_until(Duration::from_secs(3), || temperature.is_valid()));
    assert_eq!(temperature.state().value, 19.0);
    assert!(client.connection().terminal_error().is_none());
    assert!(!client.connection().is_closed());

    let info = client.device_info().expect("connection should still answer");
    assert_eq!(info.name, "porch");

    drop(client);
    device.join();
}
