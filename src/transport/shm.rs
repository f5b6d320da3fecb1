//! Shared-memory broadcast channel.
//!
//! One file per stream under the channel address directory:
//!
//! ```text
//! ┌──────────────────┐ 0
//! │ ChannelHeader    │ magic/version/geometry, write_seq, publisher heartbeat
//! ├──────────────────┤ 256
//! │ SubscriberEntry  │ × MAX_SUBSCRIBERS: generation+state, alias, read_seq, heartbeat
//! ├──────────────────┤ 256 + 64 × MAX_SUBSCRIBERS
//! │ ring of slots    │ × ring_slots, SLOT_SIZE bytes each
//! └──────────────────┘
//! ```
//!
//! The publisher never overwrites a slot the slowest live subscriber has not
//! consumed; it reports `Congested` instead. Subscribers whose heartbeat is older
//! than the liveness TTL stop counting for flow control and connectivity. A
//! subscriber that was lapped while stale skips forward to the writer position.
//! Slots are seqlock-validated, so a lapped read is dropped, never torn.

use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, info};

use crate::core::mmap::MmapFile;
use crate::core::{Clock, Error, Result, SystemClock};
use crate::transport::lock::PublisherLock;
use crate::transport::{ChannelDescriptor, Publication, SendOutcome, Subscription, Transport};

pub const CHANNEL_MAGIC: u32 = 0x504C_5343; // 'PLSC'
pub const CHANNEL_VERSION: u32 = 1;
pub const MAX_SUBSCRIBERS: usize = 64;
pub const SLOT_SIZE: usize = 128;
pub const SLOT_HEADER_SIZE: usize = size_of::<SlotHeader>();
pub const MAX_FRAGMENT_LEN: usize = SLOT_SIZE - SLOT_HEADER_SIZE;
pub const DEFAULT_RING_SLOTS: u32 = 1024;
pub const DEFAULT_LIVENESS_TTL: Duration = Duration::from_secs(1);

const INIT_WRITING: u32 = 1;
const INIT_READY: u32 = 2;

const ENTRY_FREE: u32 = 0;
const ENTRY_CLAIMING: u32 = 1;
const ENTRY_ACTIVE: u32 = 2;

const SLOT_BUSY: u64 = u64::MAX;

#[repr(C, align(128))]
pub struct ChannelHeader {
    // Constant after creation.
    pub magic: AtomicU32,
    pub version: AtomicU32,
    pub init_state: AtomicU32,
    pub ring_slots: AtomicU32,
    pub stream_id: AtomicU32,
    pub _pad0: [u8; 108],

    // Writer-hot.
    pub write_seq: AtomicU64,
    pub publisher_heartbeat_ns: AtomicU64,
    pub _pad1: [u8; 112],
}

/// One subscriber table row. `owner` packs the claim generation (high 32 bits)
/// with the entry state (low 32 bits); every claim bumps the generation.
#[repr(C, align(64))]
pub struct SubscriberEntry {
    pub owner: AtomicU64,
    pub alias: AtomicU32,
    pub _pad0: u32,
    pub read_seq: AtomicU64,
    pub heartbeat_ns: AtomicU64,
    pub _pad1: [u8; 32],
}

fn owner_word(generation: u32, state: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(state)
}

fn owner_state(word: u64) -> u32 {
    word as u32
}

fn owner_generation(word: u64) -> u32 {
    (word >> 32) as u32
}

#[repr(C)]
pub struct SlotHeader {
    /// `seq + 1` once the slot holds message `seq`; `SLOT_BUSY` while being written.
    pub seq: AtomicU64,
    pub len: AtomicU32,
    pub _pad: u32,
}

const TABLE_OFFSET: usize = size_of::<ChannelHeader>();
const RING_OFFSET: usize = TABLE_OFFSET + MAX_SUBSCRIBERS * size_of::<SubscriberEntry>();

#[derive(Clone, Copy, Debug)]
pub struct ShmConfig {
    pub ring_slots: u32,
    pub liveness_ttl: Duration,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            ring_slots: DEFAULT_RING_SLOTS,
            liveness_ttl: DEFAULT_LIVENESS_TTL,
        }
    }
}

/// Transport whose addresses are directories on a (preferably tmpfs) filesystem.
#[derive(Clone, Debug, Default)]
pub struct ShmTransport {
    config: ShmConfig,
}

impl ShmTransport {
    pub fn new(config: ShmConfig) -> Self {
        Self { config }
    }
}

impl Transport for ShmTransport {
    type Publication = ShmPublication;
    type Subscription = ShmSubscription;

    fn open_publish_endpoint(&self, address: &str, stream_id: i32) -> Result<ShmPublication> {
        ShmPublication::open(Path::new(address), stream_id, self.config)
    }

    fn open_subscribe_endpoint(
        &self,
        address: &str,
        stream_id: i32,
        ordinal: u32,
    ) -> Result<ShmSubscription> {
        ShmSubscription::open(Path::new(address), stream_id, ordinal, self.config)
    }
}

pub fn channel_path(address: &Path, stream_id: i32) -> PathBuf {
    address.join(format!("stream-{stream_id}.chan"))
}

fn lock_path(address: &Path, stream_id: i32) -> PathBuf {
    address.join(format!("stream-{stream_id}.lock"))
}

struct ChannelFile {
    mmap: MmapFile,
    base: *mut u8,
    ring_slots: u32,
}

// SAFETY: ChannelFile owns the mapping; all shared fields are atomics and slot
// payloads are only touched through seqlock-validated raw copies.
unsafe impl Send for ChannelFile {}

impl ChannelFile {
    fn create(path: &Path, stream_id: i32, ring_slots: u32) -> Result<Self> {
        if ring_slots == 0 {
            return Err(Error::InvalidConfig("ring must have at least one slot".into()));
        }
        let len = RING_OFFSET + ring_slots as usize * SLOT_SIZE;
        let tmp_path = path.with_extension("tmp");
        let mut mmap = MmapFile::create(&tmp_path, len)?;
        mmap.as_mut_slice().fill(0);
        let base = mmap.as_ptr();
        let file = Self {
            mmap,
            base,
            ring_slots,
        };
        let header = file.header();
        header.init_state.store(INIT_WRITING, Ordering::Relaxed);
        header.version.store(CHANNEL_VERSION, Ordering::Relaxed);
        header.ring_slots.store(ring_slots, Ordering::Relaxed);
        header.stream_id.store(stream_id as u32, Ordering::Relaxed);
        header.write_seq.store(0, Ordering::Relaxed);
        header.publisher_heartbeat_ns.store(0, Ordering::Relaxed);
        header.magic.store(CHANNEL_MAGIC, Ordering::Relaxed);
        header.init_state.store(INIT_READY, Ordering::Release);
        std::fs::rename(&tmp_path, path)?;
        Ok(file)
    }

    fn open(path: &Path) -> Result<Self> {
        let mmap = match MmapFile::open(path) {
            Ok(mmap) => mmap,
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ChannelNotReady)
            }
            Err(err) => return Err(err),
        };
        if mmap.len() < RING_OFFSET {
            return Err(Error::Corrupt("channel shorter than header"));
        }
        let base = mmap.as_ptr();
        let mut file = Self {
            mmap,
            base,
            ring_slots: 0,
        };
        let header = file.header();
        if header.init_state.load(Ordering::Acquire) != INIT_READY {
            return Err(Error::ChannelNotReady);
        }
        if header.magic.load(Ordering::Acquire) != CHANNEL_MAGIC {
            return Err(Error::Corrupt("channel magic mismatch"));
        }
        let version = header.version.load(Ordering::Acquire);
        if version != CHANNEL_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let ring_slots = header.ring_slots.load(Ordering::Acquire);
        if ring_slots == 0 || RING_OFFSET + ring_slots as usize * SLOT_SIZE > file.mmap.len() {
            return Err(Error::Corrupt("channel ring truncated"));
        }
        file.ring_slots = ring_slots;
        Ok(file)
    }

    fn header(&self) -> &ChannelHeader {
        unsafe { &*(self.base as *const ChannelHeader) }
    }

    fn entries(&self) -> &[SubscriberEntry] {
        unsafe {
            std::slice::from_raw_parts(
                self.base.add(TABLE_OFFSET) as *const SubscriberEntry,
                MAX_SUBSCRIBERS,
            )
        }
    }

    fn slot(&self, seq: u64) -> (&SlotHeader, *mut u8) {
        let index = (seq % self.ring_slots as u64) as usize;
        unsafe {
            let slot = self.base.add(RING_OFFSET + index * SLOT_SIZE);
            (&*(slot as *const SlotHeader), slot.add(SLOT_HEADER_SIZE))
        }
    }
}

fn is_live(heartbeat_ns: u64, now: u64, ttl_ns: u64) -> bool {
    heartbeat_ns != 0 && now.saturating_sub(heartbeat_ns) <= ttl_ns
}

fn ttl_ns(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX)
}

pub struct ShmPublication {
    channel: ChannelFile,
    path: PathBuf,
    clock: SystemClock,
    ttl_ns: u64,
    _lock: PublisherLock,
}

impl ShmPublication {
    /// Takes the publisher lock and recreates the channel file from scratch.
    pub fn open(address: &Path, stream_id: i32, config: ShmConfig) -> Result<Self> {
        std::fs::create_dir_all(address)?;
        let lock = PublisherLock::acquire(&lock_path(address, stream_id))?;
        let path = channel_path(address, stream_id);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("removed stale channel {}", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let channel = ChannelFile::create(&path, stream_id, config.ring_slots)?;
        let clock = SystemClock;
        channel
            .header()
            .publisher_heartbeat_ns
            .store(clock.now(), Ordering::Release);
        info!(
            "opened publication {} ({} slots)",
            ChannelDescriptor::new(address.display().to_string(), stream_id),
            config.ring_slots
        );
        Ok(Self {
            channel,
            path,
            clock,
            ttl_ns: ttl_ns(config.liveness_ttl),
            _lock: lock,
        })
    }

    pub fn position(&self) -> u64 {
        self.channel.header().write_seq.load(Ordering::Acquire)
    }

    fn heartbeat(&self) -> u64 {
        let now = self.clock.now();
        self.channel
            .header()
            .publisher_heartbeat_ns
            .store(now, Ordering::Release);
        now
    }

    /// Lowest read position among live subscribers, if any are live.
    fn min_live_position(&self, now: u64) -> Option<u64> {
        self.channel
            .entries()
            .iter()
            .filter(|entry| owner_state(entry.owner.load(Ordering::Acquire)) == ENTRY_ACTIVE)
            .filter(|entry| is_live(entry.heartbeat_ns.load(Ordering::Acquire), now, self.ttl_ns))
            .map(|entry| entry.read_seq.load(Ordering::Acquire))
            .min()
    }
}

impl Publication for ShmPublication {
    fn is_connected(&self) -> bool {
        let now = self.heartbeat();
        self.min_live_position(now).is_some()
    }

    fn try_send(&mut self, payload: &[u8]) -> Result<SendOutcome> {
        if payload.len() > MAX_FRAGMENT_LEN {
            return Err(Error::PayloadTooLarge);
        }
        let now = self.heartbeat();
        let Some(min_read) = self.min_live_position(now) else {
            return Ok(SendOutcome::NotConnected);
        };
        let header = self.channel.header();
        let seq = header.write_seq.load(Ordering::Relaxed);
        if seq.saturating_sub(min_read) >= self.channel.ring_slots as u64 {
            return Ok(SendOutcome::Congested);
        }

        let (slot, data) = self.channel.slot(seq);
        slot.seq.store(SLOT_BUSY, Ordering::Relaxed);
        fence(Ordering::Release);
        unsafe { std::ptr::copy_nonoverlapping(payload.as_ptr(), data, payload.len()) };
        slot.len.store(payload.len() as u32, Ordering::Relaxed);
        slot.seq.store(seq + 1, Ordering::Release);
        header.write_seq.store(seq + 1, Ordering::Release);
        Ok(SendOutcome::Sent)
    }
}

impl Drop for ShmPublication {
    fn drop(&mut self) {
        self.channel
            .header()
            .publisher_heartbeat_ns
            .store(0, Ordering::Release);
        let _ = std::fs::remove_file(&self.path);
        info!("closed publication {}", self.path.display());
    }
}

pub struct ShmSubscription {
    channel: ChannelFile,
    entry: usize,
    /// `owner` word while this subscription holds the entry.
    owned: u64,
    read_seq: u64,
    clock: SystemClock,
    ttl_ns: u64,
    descriptor: ChannelDescriptor,
    scratch: [u8; MAX_FRAGMENT_LEN],
}

impl ShmSubscription {
    /// Registers in the channel's subscriber table and starts at the writer's
    /// current position.
    ///
    /// Fails with `ChannelNotReady` while no publisher has created the channel.
    pub fn open(address: &Path, stream_id: i32, alias: u32, config: ShmConfig) -> Result<Self> {
        let channel = ChannelFile::open(&channel_path(address, stream_id))?;
        let clock = SystemClock;
        let ttl_ns = ttl_ns(config.liveness_ttl);
        let (entry, owned) = claim_entry(&channel, alias, clock.now(), ttl_ns)?;
        let read_seq = channel.entries()[entry].read_seq.load(Ordering::Acquire);
        let descriptor =
            ChannelDescriptor::new(address.display().to_string(), stream_id).tagged(alias);
        info!("opened subscription {descriptor} in table slot {entry}");
        Ok(Self {
            channel,
            entry,
            owned,
            read_seq,
            clock,
            ttl_ns,
            descriptor,
            scratch: [0u8; MAX_FRAGMENT_LEN],
        })
    }

    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    pub fn position(&self) -> u64 {
        self.read_seq
    }

    fn entry(&self) -> &SubscriberEntry {
        &self.channel.entries()[self.entry]
    }

    /// False once another subscriber took the entry over after this one went stale.
    pub fn owns_entry(&self) -> bool {
        self.entry().owner.load(Ordering::Acquire) == self.owned
    }

    fn skip_to_writer(&mut self) {
        let head = self.channel.header().write_seq.load(Ordering::Acquire);
        debug!(
            "subscription {} lapped at {}, skipping to {head}",
            self.descriptor, self.read_seq
        );
        self.read_seq = head.max(self.read_seq);
    }
}

/// Takes a free table entry, or one whose owner stopped heartbeating.
///
/// Returns the entry index and the `owner` word it was claimed under.
fn claim_entry(channel: &ChannelFile, alias: u32, now: u64, ttl_ns: u64) -> Result<(usize, u64)> {
    let head = channel.header().write_seq.load(Ordering::Acquire);
    let take = |entry: &SubscriberEntry, word: u64| -> Option<u64> {
        let generation = owner_generation(word).wrapping_add(1);
        entry
            .owner
            .compare_exchange(
                word,
                owner_word(generation, ENTRY_CLAIMING),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;
        entry.alias.store(alias, Ordering::Relaxed);
        entry.read_seq.store(head, Ordering::Relaxed);
        entry.heartbeat_ns.store(now, Ordering::Relaxed);
        let owned = owner_word(generation, ENTRY_ACTIVE);
        entry.owner.store(owned, Ordering::Release);
        Some(owned)
    };

    for (index, entry) in channel.entries().iter().enumerate() {
        let word = entry.owner.load(Ordering::Acquire);
        if owner_state(word) != ENTRY_FREE {
            continue;
        }
        if let Some(owned) = take(entry, word) {
            return Ok((index, owned));
        }
    }
    for (index, entry) in channel.entries().iter().enumerate() {
        let word = entry.owner.load(Ordering::Acquire);
        if owner_state(word) != ENTRY_ACTIVE
            || is_live(entry.heartbeat_ns.load(Ordering::Acquire), now, ttl_ns)
        {
            continue;
        }
        if let Some(owned) = take(entry, word) {
            debug!("took over stale subscriber entry {index}");
            return Ok((index, owned));
        }
    }
    Err(Error::ChannelFull)
}

impl Subscription for ShmSubscription {
    fn is_connected(&self) -> bool {
        let heartbeat = self
            .channel
            .header()
            .publisher_heartbeat_ns
            .load(Ordering::Acquire);
        is_live(heartbeat, self.clock.now(), self.ttl_ns)
    }

    fn poll(&mut self, handler: &mut dyn FnMut(&[u8]), max_fragments: usize) -> usize {
        let mut handled = 0;
        while handled < max_fragments {
            let expected = self.read_seq + 1;
            let (slot, data) = self.channel.slot(self.read_seq);
            let before = slot.seq.load(Ordering::Acquire);
            if before != expected {
                let head = self.channel.header().write_seq.load(Ordering::Acquire);
                if before != SLOT_BUSY && before > expected
                    || head > self.read_seq + self.channel.ring_slots as u64
                {
                    self.skip_to_writer();
                    continue;
                }
                break;
            }

            let len = (slot.len.load(Ordering::Relaxed) as usize).min(MAX_FRAGMENT_LEN);
            unsafe { std::ptr::copy_nonoverlapping(data, self.scratch.as_mut_ptr(), len) };
            fence(Ordering::Acquire);
            if slot.seq.load(Ordering::Relaxed) != expected {
                self.skip_to_writer();
                continue;
            }

            handler(&self.scratch[..len]);
            self.read_seq += 1;
            handled += 1;
        }

        if self.owns_entry() {
            let now = self.clock.now();
            let entry = self.entry();
            entry.read_seq.store(self.read_seq, Ordering::Release);
            entry.heartbeat_ns.store(now, Ordering::Release);
        }
        handled
    }
}

impl Drop for ShmSubscription {
    fn drop(&mut self) {
        let freed = owner_word(owner_generation(self.owned), ENTRY_FREE);
        if self
            .entry()
            .owner
            .compare_exchange(self.owned, freed, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("subscription {} lost its entry to a newer subscriber", self.descriptor);
        }
        info!("closed subscription {}", self.descriptor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(ring_slots: u32) -> ShmConfig {
        ShmConfig {
            ring_slots,
            ..ShmConfig::default()
        }
    }

    fn drain(sub: &mut ShmSubscription) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        sub.poll(&mut |payload| out.push(payload.to_vec()), usize::MAX);
        out
    }

    #[test]
    fn layout_is_cache_aligned() {
        assert_eq!(size_of::<ChannelHeader>(), 256);
        assert_eq!(size_of::<SubscriberEntry>(), 64);
        assert_eq!(SLOT_HEADER_SIZE, 16);
        assert!(MAX_FRAGMENT_LEN >= crate::core::MESSAGE_LEN);
    }

    #[test]
    fn owner_word_packs_generation_and_state() {
        let word = owner_word(7, ENTRY_ACTIVE);
        assert_eq!(owner_generation(word), 7);
        assert_eq!(owner_state(word), ENTRY_ACTIVE);
        assert_eq!(owner_generation(owner_word(u32::MAX, ENTRY_FREE)), u32::MAX);
    }

    #[test]
    fn subscribe_before_publisher_is_not_ready() {
        let dir = tempdir().expect("tempdir");
        let err = ShmSubscription::open(dir.path(), 7, 0, config(8)).err().expect("error");
        assert!(matches!(err, Error::ChannelNotReady));
    }

    #[test]
    fn publication_without_subscribers_is_not_connected() {
        let dir = tempdir().expect("tempdir");
        let mut publication = ShmPublication::open(dir.path(), 7, config(8)).expect("pub");
        assert!(!publication.is_connected());
        assert_eq!(
            publication.try_send(b"hello").expect("send"),
            SendOutcome::NotConnected
        );
    }

    #[test]
    fn broadcast_reaches_every_subscriber_in_order() {
        let dir = tempdir().expect("tempdir");
        let mut publication = ShmPublication::open(dir.path(), 7, config(8)).expect("pub");
        let mut fast = ShmSubscription::open(dir.path(), 7, 1, config(8)).expect("sub 1");
        let mut slow = ShmSubscription::open(dir.path(), 7, 0, config(8)).expect("sub 0");
        assert!(publication.is_connected());
        assert!(fast.is_connected());

        for payload in [b"one".as_slice(), b"two", b"three"] {
            assert_eq!(publication.try_send(payload).expect("send"), SendOutcome::Sent);
        }

        let expected = vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()];
        assert_eq!(drain(&mut fast), expected);
        assert_eq!(drain(&mut slow), expected);
        assert!(drain(&mut fast).is_empty());
    }

    #[test]
    fn slowest_live_subscriber_applies_backpressure() {
        let dir = tempdir().expect("tempdir");
        let mut publication = ShmPublication::open(dir.path(), 7, config(4)).expect("pub");
        let mut sub = ShmSubscription::open(dir.path(), 7, 0, config(4)).expect("sub");

        for _ in 0..4 {
            assert_eq!(publication.try_send(b"x").expect("send"), SendOutcome::Sent);
        }
        assert_eq!(publication.try_send(b"x").expect("send"), SendOutcome::Congested);

        assert_eq!(sub.poll(&mut |_| {}, 2), 2);
        assert_eq!(publication.try_send(b"x").expect("send"), SendOutcome::Sent);
    }

    #[test]
    fn poll_respects_fragment_limit() {
        let dir = tempdir().expect("tempdir");
        let mut publication = ShmPublication::open(dir.path(), 7, config(16)).expect("pub");
        let mut sub = ShmSubscription::open(dir.path(), 7, 0, config(16)).expect("sub");
        for i in 0..10u8 {
            publication.try_send(&[i; 8]).expect("send");
        }
        assert_eq!(sub.poll(&mut |_| {}, 4), 4);
        assert_eq!(sub.position(), 4);
        assert_eq!(drain(&mut sub).len(), 6);
    }

    #[test]
    fn oversized_fragment_rejected() {
        let dir = tempdir().expect("tempdir");
        let mut publication = ShmPublication::open(dir.path(), 7, config(4)).expect("pub");
        let _sub = ShmSubscription::open(dir.path(), 7, 0, config(4)).expect("sub");
        let big = vec![0u8; MAX_FRAGMENT_LEN + 1];
        assert!(matches!(publication.try_send(&big), Err(Error::PayloadTooLarge)));
    }

    #[test]
    fn dropped_subscriber_frees_its_entry() {
        let dir = tempdir().expect("tempdir");
        let publication = ShmPublication::open(dir.path(), 7, config(4)).expect("pub");
        let sub = ShmSubscription::open(dir.path(), 7, 0, config(4)).expect("sub");
        assert!(publication.is_connected());
        drop(sub);
        assert!(!publication.is_connected());
    }

    #[test]
    fn publisher_drop_removes_channel_and_disconnects() {
        let dir = tempdir().expect("tempdir");
        let publication = ShmPublication::open(dir.path(), 7, config(4)).expect("pub");
        let sub = ShmSubscription::open(dir.path(), 7, 0, config(4)).expect("sub");
        assert!(sub.is_connected());
        drop(publication);
        assert!(!channel_path(dir.path(), 7).exists());
        assert!(!sub.is_connected());
    }

    #[test]
    fn stale_subscriber_is_ignored_and_skips_forward() {
        let dir = tempdir().expect("tempdir");
        let shm = ShmConfig {
            ring_slots: 4,
            liveness_ttl: Duration::from_millis(20),
        };
        let mut publication = ShmPublication::open(dir.path(), 7, shm).expect("pub");
        let mut stale = ShmSubscription::open(dir.path(), 7, 0, shm).expect("stale");
        let mut live = ShmSubscription::open(dir.path(), 7, 1, shm).expect("live");

        std::thread::sleep(Duration::from_millis(40));
        for round in 0..3u8 {
            for i in 0..4u8 {
                live.poll(&mut |_| {}, 0);
                assert_eq!(
                    publication.try_send(&[round, i]).expect("send"),
                    SendOutcome::Sent
                );
            }
            assert_eq!(live.poll(&mut |_| {}, usize::MAX), 4);
        }

        let received = drain(&mut stale);
        assert!(received.len() <= 4);
        assert_eq!(stale.position(), publication.position());
    }

    #[test]
    fn evicted_subscriber_cannot_free_its_successor() {
        let dir = tempdir().expect("tempdir");
        let shm = ShmConfig {
            ring_slots: 4,
            liveness_ttl: Duration::from_millis(200),
        };
        let mut publication = ShmPublication::open(dir.path(), 7, shm).expect("pub");
        let mut crowd: Vec<ShmSubscription> = (0..MAX_SUBSCRIBERS as u32)
            .map(|alias| ShmSubscription::open(dir.path(), 7, alias, shm).expect("sub"))
            .collect();
        assert!(matches!(
            ShmSubscription::open(dir.path(), 7, 99, shm),
            Err(Error::ChannelFull)
        ));

        std::thread::sleep(Duration::from_millis(300));
        let mut newcomer = ShmSubscription::open(dir.path(), 7, 99, shm).expect("takeover");
        let evicted: Vec<usize> = crowd
            .iter()
            .filter(|sub| !sub.owns_entry())
            .map(|sub| sub.entry)
            .collect();
        assert_eq!(evicted, vec![newcomer.entry]);

        // The evicted owner wakes up, polls and goes away.
        for sub in &mut crowd {
            sub.poll(&mut |_| {}, usize::MAX);
        }
        drop(crowd);

        newcomer.poll(&mut |_| {}, 0);
        assert!(newcomer.owns_entry());
        assert!(publication.is_connected());
        assert_eq!(publication.try_send(b"hi").expect("send"), SendOutcome::Sent);
        assert_eq!(drain(&mut newcomer), vec![b"hi".to_vec()]);
    }
}
