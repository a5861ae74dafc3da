// End-to-end wire tests: typed message -> container -> AEAD -> shards ->
// datagrams -> reassembly -> typed message, across real sockets.

use std::time::Duration;

use indexmap::IndexMap;

use kopach_common::{
    block::{Block, BlockHeader},
    crypto::{hash, Hash},
    fork::TargetBits,
    message::{BusEnvelope, HashrateReport, Job, NodeAnnouncement, Solution},
    wire::{Channel, ChannelConfig},
};

fn loopback() -> ChannelConfig {
    ChannelConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        group: None,
        target: "127.0.0.1:9".parse().unwrap(),
    }
}

fn pair(passphrase: &str) -> (std::sync::Arc<Channel>, std::sync::Arc<Channel>) {
    let receiver = Channel::open(passphrase, loopback()).unwrap();
    let mut config = loopback();
    config.target = receiver.local_addr().unwrap();
    let sender = Channel::open(passphrase, config).unwrap();
    (receiver, sender)
}

fn sample_job() -> Job {
    let mut bitses = TargetBits::new();
    bitses.insert(2, 0x1d00ffff);
    bitses.insert(514, 0x1c00ffff);
    let mut merkles = IndexMap::new();
    merkles.insert(2, hash(b"root for sha256d"));
    merkles.insert(514, hash(b"root for keccak"));
    Job {
        announcement: NodeAnnouncement {
            ips: vec!["192.168.0.17".parse().unwrap()],
            p2p_port: 11047,
            rpc_port: 11048,
            controller_port: 11050,
        },
        height: 123_456,
        prev_block: hash(b"best block"),
        bitses,
        merkles,
    }
}

#[tokio::test]
async fn test_every_message_kind_round_trips_on_the_wire() {
    let (receiver, sender) = pair("shared secret");

    let announcement = sample_job().announcement.clone();
    let solution = Solution::new(
        11050,
        Block::new(BlockHeader::new(
            514,
            hash(b"prev"),
            hash(b"merkle"),
            1_700_000_000,
            0x1c00ffff,
        )),
    );
    let messages = vec![
        BusEnvelope::Job(sample_job()),
        BusEnvelope::Pause(announcement.clone()),
        BusEnvelope::Advertisement(announcement),
        BusEnvelope::Solution(solution),
        BusEnvelope::Hashrate(HashrateReport::new(69, 42, 123_456)),
    ];

    for message in messages {
        sender.send(&message).await.unwrap();
        let (_, received) = kopach_common::tokio::time::timeout(
            Duration::from_secs(5),
            receiver.recv(),
        )
        .await
        .expect("receive timed out")
        .unwrap();
        assert_eq!(received, message);
    }
}

#[tokio::test]
async fn test_job_survives_rebroadcast_of_cached_shards() {
    let (receiver, sender) = pair("shared secret");
    let job = sample_job();

    // Controllers cache the shard set and resend it unchanged every tick.
    let shards = sender.shards(&BusEnvelope::Job(job.clone())).unwrap();
    for _ in 0..3 {
        sender.send_shards(&shards).await.unwrap();
    }

    for _ in 0..3 {
        let (_, received) = kopach_common::tokio::time::timeout(
            Duration::from_secs(5),
            receiver.recv(),
        )
        .await
        .expect("receive timed out")
        .unwrap();
        match received {
            BusEnvelope::Job(received) => {
                assert_eq!(received, job);
                assert_eq!(received.merkle_digest(), job.merkle_digest());
            }
            other => panic!("expected a job, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_dropped_fragment_is_not_a_message() {
    let (receiver, sender) = pair("shared secret");

    // A solution fat enough to shard, minus one datagram: the receiver
    // must deliver nothing for it, then accept a complete send.
    let mut transactions = Vec::new();
    for i in 0..200u32 {
        transactions.push(kopach_common::block::Transaction {
            version: 1,
            inputs: vec![kopach_common::block::TxIn {
                previous_output: kopach_common::block::OutPoint::null(),
                script_sig: vec![i as u8; 100],
                sequence: u32::MAX,
            }],
            outputs: vec![kopach_common::block::TxOut {
                value: i as i64,
                script_pubkey: vec![0x51; 40],
            }],
            lock_time: 0,
        });
    }
    let block = Block::with_transactions(
        BlockHeader::new(2, hash(b"prev"), Hash::zero(), 0, 0x1d00ffff),
        transactions,
    );
    let message = BusEnvelope::Solution(Solution::new(11050, block));

    let shards = sender.shards(&message).unwrap();
    assert!(shards.len() > 2);
    sender.send_shards(&shards[1..]).await.unwrap();

    // The incomplete message never completes; the follow-up does.
    let marker = BusEnvelope::Hashrate(HashrateReport::new(69, 1, 1));
    sender.send(&marker).await.unwrap();
    let (_, received) =
        kopach_common::tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("receive timed out")
            .unwrap();
    assert_eq!(received, marker);
}
