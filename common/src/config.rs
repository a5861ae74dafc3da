// Constants shared by the controller and the miner binaries.

use std::net::Ipv4Addr;

// 8 decimal places, 100 000 000 base units per coin.
pub const COIN_DECIMALS: u8 = 8;
pub const COIN: i64 = 10i64.pow(COIN_DECIMALS as u32);

// The work bus: one multicast group shared by every controller, supervisor
// and worker on the LAN. Authentication is possession of the miner
// passphrase, not the address.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);
pub const MULTICAST_PORT: u16 = 11049;

// Largest UDP datagram the bus will emit; larger messages are sharded.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

// A partial shard reassembly untouched for this long is discarded.
pub const SHARD_TTL_SECS: u64 = 3;

// Consecutive hash attempts a worker spends on one algorithm before
// rotating to the next.
pub const ROUNDS_PER_ALGO: i32 = 69;

// Capacity of the cumulative hash-count sample ring.
pub const SAMPLE_RING_SIZE: usize = 1000;

// Window of the hashrate moving average over ring samples.
pub const EWMA_WINDOW: usize = 15;

// A controller unheard from for this long is considered gone: supervisors
// clear their first-sender lock and controllers evict the peer entry.
pub const CONTROLLER_TIMEOUT_SECS: u64 = 3;

// Minimum template age before a mempool change alone forces regeneration.
pub const TEMPLATE_REFRESH_SECS: u64 = 60;

// Default port probed by the getwork endpoint scanner.
pub const DEFAULT_RPC_PORT: u16 = 11048;
