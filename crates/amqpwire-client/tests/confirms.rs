mod common;

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use amqpwire_client::{CancelToken, Channel, Confirmation, Connection, Error, Publishing};
use amqpwire_frame::method::{BasicAck, BasicNack, BasicPublish};
use amqpwire_frame::Method;
use common::{connect, open_channel, Broker};

fn confirm_channel() -> (Connection, Channel, Broker) {
    let (conn, broker) = connect();
    let (channel, broker) = open_channel(&conn, broker);
    let handle = thread::spawn(move || {
        let mut broker = broker;
        match broker.recv_method_on(1) {
            Method::ConfirmSelect(select) => assert!(!select.no_wait),
            other => panic!("expected confirm.select, got {other:?}"),
        }
        broker.send(1, Method::ConfirmSelectOk);
        broker
    });
    channel.confirm_select(false).unwrap();
    (conn, channel, handle.join().unwrap())
}

fn ack(delivery_tag: u64, multiple: bool) -> Method {
    Method::BasicAck(BasicAck {
        delivery_tag,
        multiple,
    })
}

fn publish_args() -> BasicPublish {
    BasicPublish {
        exchange: "orders".to_string(),
        routing_key: "eu".to_string(),
        ..Default::default()
    }
}

#[test]
fn publish_without_confirm_mode_has_no_confirmation() {
    let (conn, broker) = connect();
    let (channel, mut broker) = open_channel(&conn, broker);

    let confirm = channel
        .publish_with_confirm(publish_args(), Publishing::new("plain"))
        .unwrap();
    assert!(confirm.is_none());
    assert_eq!(&broker.recv_publish().body[..], b"plain");
}

#[test]
fn multiple_ack_settles_everything_up_to_the_tag() {
    let (_conn, channel, mut broker) = confirm_channel();
    assert_eq!(channel.next_publish_seq_no(), 1);

    let confirms: Vec<_> = (0..3)
        .map(|i| {
            channel
                .publish_with_confirm(publish_args(), Publishing::new(format!("m{i}")))
                .unwrap()
                .unwrap()
        })
        .collect();
    let tags: Vec<_> = confirms.iter().map(|c| c.delivery_tag()).collect();
    assert_eq!(tags, vec![1, 2, 3]);
    assert_eq!(channel.next_publish_seq_no(), 4);
    for _ in 0..3 {
        broker.recv_publish();
    }

    broker.send(1, ack(2, true));
    assert_eq!(confirms[0].wait_timeout(Duration::from_secs(2)), Some(true));
    assert_eq!(confirms[1].wait_timeout(Duration::from_secs(2)), Some(true));
    assert_eq!(confirms[2].try_result(), None);

    broker.send(
        1,
        Method::BasicNack(BasicNack {
            delivery_tag: 3,
            multiple: false,
            requeue: false,
        }),
    );
    assert!(!confirms[2].wait().unwrap());
    // settled results are sticky
    assert_eq!(confirms[2].try_result(), Some(false));
}

#[test]
fn confirmation_stream_is_in_publish_order() {
    let (_conn, channel, mut broker) = confirm_channel();
    let stream = channel.notify_publish();

    for i in 0..3 {
        channel
            .publish(publish_args(), Publishing::new(format!("m{i}")))
            .unwrap();
        broker.recv_publish();
    }

    broker.send(1, ack(3, false));
    broker.send(
        1,
        Method::BasicNack(BasicNack {
            delivery_tag: 1,
            multiple: false,
            requeue: true,
        }),
    );
    broker.send(1, ack(2, false));

    let received: Vec<_> = (0..3)
        .map(|_| stream.recv_timeout(Duration::from_secs(2)).unwrap())
        .collect();
    assert_eq!(
        received,
        vec![
            Confirmation {
                delivery_tag: 1,
                ack: false
            },
            Confirmation {
                delivery_tag: 2,
                ack: true
            },
            Confirmation {
                delivery_tag: 3,
                ack: true
            },
        ]
    );
}

#[test]
fn concurrent_publishers_get_tags_in_wire_order() {
    const PUBLISHERS: usize = 4;
    const PER_PUBLISHER: usize = 25;
    const TOTAL: usize = PUBLISHERS * PER_PUBLISHER;

    let (_conn, channel, broker) = confirm_channel();

    let wire = thread::spawn(move || {
        let mut broker = broker;
        let bodies: Vec<_> = (0..TOTAL).map(|_| broker.recv_publish().body).collect();
        broker.send(1, ack(TOTAL as u64, true));
        (broker, bodies)
    });

    let publishers: Vec<_> = (0..PUBLISHERS)
        .map(|p| {
            let channel = channel.clone();
            thread::spawn(move || {
                (0..PER_PUBLISHER)
                    .map(|i| {
                        let body = format!("{p}:{i}");
                        let confirm = channel
                            .publish_with_confirm(publish_args(), Publishing::new(body.clone()))
                            .unwrap()
                            .unwrap();
                        (confirm, body)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut by_tag = HashMap::new();
    let mut confirms = Vec::new();
    for publisher in publishers {
        let mut last = 0;
        for (confirm, body) in publisher.join().unwrap() {
            // each publisher sees its own tags strictly increase
            assert!(confirm.delivery_tag() > last);
            last = confirm.delivery_tag();
            by_tag.insert(confirm.delivery_tag(), body);
            confirms.push(confirm);
        }
    }
    let (_broker, bodies) = wire.join().unwrap();

    assert_eq!(by_tag.len(), TOTAL);
    for (index, body) in bodies.iter().enumerate() {
        let tag = index as u64 + 1;
        assert_eq!(body.as_ref(), by_tag[&tag].as_bytes(), "tag {tag}");
    }
    for confirm in &confirms {
        assert_eq!(confirm.wait_timeout(Duration::from_secs(2)), Some(true));
    }
}

#[test]
fn close_resolves_outstanding_confirms_negatively() {
    let (_conn, channel, broker) = confirm_channel();
    let stream = channel.notify_publish();

    let handle = thread::spawn(move || {
        let mut broker = broker;
        broker.recv_publish();
        broker.recv_publish();
        broker.send(1, ack(1, false));
        broker.expect_channel_close(1)
    });

    let first = channel
        .publish_with_confirm(publish_args(), Publishing::new("a"))
        .unwrap()
        .unwrap();
    let second = channel
        .publish_with_confirm(publish_args(), Publishing::new("b"))
        .unwrap()
        .unwrap();
    assert_eq!(first.wait_timeout(Duration::from_secs(2)), Some(true));

    channel.close().unwrap();
    handle.join().unwrap();
    assert_eq!(second.try_result(), Some(false));

    let received: Vec<_> = stream.iter().collect();
    assert_eq!(
        received,
        vec![
            Confirmation {
                delivery_tag: 1,
                ack: true
            },
            Confirmation {
                delivery_tag: 2,
                ack: false
            },
        ]
    );
}

#[test]
fn publish_after_close_is_rejected() {
    let (_conn, channel, broker) = confirm_channel();
    let handle = thread::spawn(move || {
        let mut broker = broker;
        broker.expect_channel_close(1)
    });
    channel.close().unwrap();
    handle.join().unwrap();

    assert!(channel
        .publish(publish_args(), Publishing::new("late"))
        .is_err());
    assert_eq!(channel.next_publish_seq_no(), 1);
}

#[test]
fn confirm_wait_follows_the_publishing_handle_token() {
    let (_conn, channel, mut broker) = confirm_channel();
    let token = CancelToken::new();
    let cancellable = channel.with_cancel(token.clone());

    let confirm = cancellable
        .publish_with_confirm(publish_args(), Publishing::new("slow"))
        .unwrap()
        .unwrap();
    broker.recv_publish();
    token.cancel();
    assert!(matches!(confirm.wait(), Err(Error::Cancelled)));

    // cancelling the wait does not give up on the confirmation
    broker.send(1, ack(1, false));
    assert_eq!(confirm.wait_timeout(Duration::from_secs(2)), Some(true));
    assert!(confirm.wait().unwrap());
}
