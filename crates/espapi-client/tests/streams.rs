mod common;

use std::io::Cursor;

use espapi_client::{ClientError, LogLevel};
use espapi_frame::{proto, Message};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};

use common::{camera, dial, DeviceSide, FakeDevice, PASSWORD};

const CAMERA_KEY: u32 = 7;

fn log_line(tag: &str, message: &str) -> proto::SubscribeLogsResponse {
    proto::SubscribeLogsResponse {
        level: LogLevel::Info as i32,
        tag: tag.into(),
        message: message.into(),
        send_failed: false,
    }
}

fn send_frame(side: &mut DeviceSide, frame: &[u8]) {
    let (head, tail) = frame.split_at(frame.len() / 2);
    side.send(proto::CameraImageResponse {
        key: CAMERA_KEY,
        data: head.to_vec(),
        done: false,
    });
    side.send(proto::CameraImageResponse {
        key: CAMERA_KEY,
        data: tail.to_vec(),
        done: true,
    });
}

fn tiny_jpeg() -> Vec<u8> {
    let pixels = RgbImage::from_pixel(8, 8, Rgb([200, 40, 40]));
    let mut encoded = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(pixels)
        .write_to(&mut encoded, ImageFormat::Jpeg)
        .expect("test image should encode");
    encoded.into_inner()
}

#[test]
fn log_stream_yields_entries_until_the_device_leaves() {
    let device = FakeDevice::spawn(|side| {
        side.serve_login(&[]);
        let request: proto::SubscribeLogsRequest = side.expect();
        assert_eq!(request.level, LogLevel::Debug as i32);
        assert!(request.dump_config);

        side.send(log_line("wifi", "connected"));
        side.send(log_line("sensor", "temperature 21.5"));
        side.send(proto::DisconnectRequest {});
        let _: proto::DisconnectResponse = side.expect();
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");
    let mut logs = client
        .subscribe_logs(LogLevel::Debug, true)
        .expect("log subscription should start");

    let entries: Vec<_> = logs.by_ref().collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].tag, "wifi");
    assert_eq!(entries[1].message, "temperature 21.5");
    assert_eq!(entries[1].level, LogLevel::Info);

    assert!(logs.is_finished());
    let err = logs.take_error().expect("stream should record why it ended");
    assert!(matches!(err, ClientError::Connection(reason) if reason == "closed by device"));

    device.join();
}

#[test]
fn newer_log_subscription_ends_the_older_one() {
    let device = FakeDevice::spawn(|side| {
        side.serve_login(&[]);
        let _: proto::SubscribeLogsRequest = side.expect();
        let _: proto::SubscribeLogsRequest = side.expect();
        side.send(log_line("api", "hello"));
        side.drain();
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");
    let mut first = client.logs(LogLevel::Info).expect("first subscription");
    let mut second = client.logs(LogLevel::Info).expect("second subscription");

    assert_eq!(first.next(), None);
    assert!(matches!(first.take_error(), Some(ClientError::Cancelled(_))));
    let entry = second.next().expect("newest subscription should receive");
    assert_eq!(entry.message, "hello");

    drop(client);
    device.join();
}

#[test]
fn single_image_is_reassembled_from_chunks() {
    let device = FakeDevice::spawn(|side| {
        side.serve_login(&[camera(CAMERA_KEY)]);
        let request: proto::CameraImageRequest = side.expect();
        assert!(request.stream);
        // A chunk for some other camera is ignored.
        side.send(proto::CameraImageResponse {
            key: CAMERA_KEY + 1,
            data: b"ZZ".to_vec(),
            done: true,
        });
        side.send(proto::CameraImageResponse {
            key: CAMERA_KEY,
            data: b"AA".to_vec(),
            done: false,
        });
        side.send(proto::CameraImageResponse {
            key: CAMERA_KEY,
            data: b"BB".to_vec(),
            done: true,
        });
        side.drain();
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");
    let cam = client.camera().expect("camera should be enumerated");
    assert!(cam.last_frame().is_none());

    let frame = cam.image().expect("frame should assemble");
    assert_eq!(&frame[..], b"AABB");
    assert!(cam.last_frame().is_some());

    drop(client);
    device.join();
}

#[test]
fn decode_image_returns_pixels() {
    let jpeg = tiny_jpeg();
    let device = FakeDevice::spawn(move |side| {
        side.serve_login(&[camera(CAMERA_KEY)]);
        let _: proto::CameraImageRequest = side.expect();
        send_frame(side, &jpeg);
        side.drain();
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");
    let picture = client
        .camera()
        .expect("camera should be enumerated")
        .decode_image()
        .expect("frame should decode");
    assert_eq!(picture.dimensions(), (8, 8));

    drop(client);
    device.join();
}

#[test]
fn camera_stream_requests_again_after_each_frame() {
    let device = FakeDevice::spawn(|side| {
        side.serve_login(&[camera(CAMERA_KEY)]);
        let mut served = 0u8;
        loop {
            match side.recv() {
                Message::CameraImageRequest(_) => {
                    served += 1;
                    send_frame(side, &[b'F', served, served, b'!']);
                }
                Message::DisconnectRequest(_) => {
                    side.send(proto::DisconnectResponse {});
                    break;
                }
                _ => {}
            }
        }
        assert!(served >= 2, "device should have served two requests");
        side.drain();
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");
    let cam = client.camera().expect("camera should be enumerated");

    let frames: Vec<_> = cam
        .stream()
        .expect("stream should start")
        .take(2)
        .collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(&frames[0][..], &[b'F', 1, 1, b'!']);
    assert_eq!(&frames[1][..], &[b'F', 2, 2, b'!']);
    assert!(cam.last_frame().is_some());

    client.close().expect("close should complete the exchange");
    device.join();
}

#[test]
fn camera_stream_ends_when_the_connection_dies() {
    let device = FakeDevice::spawn(|side| {
        side.serve_login(&[camera(CAMERA_KEY)]);
        let _: proto::CameraImageRequest = side.expect();
    });

    let client = dial(&device);
    client.login(PASSWORD).expect("login should succeed");
    let mut frames = client
        .camera()
        .expect("camera should be enumerated")
        .stream()
        .expect("stream should start");

    assert_eq!(frames.next(), None);
    assert!(matches!(
        frames.take_error(),
        Some(ClientError::Connection(_))
    ));

    device.join();
}
