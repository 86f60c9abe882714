//! Transient multicast channel addresses handed to editors of a document.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::Ipv4Addr;

use parking_lot::{Mutex, RwLock};

/// First address of the channel range, 233.0.0.1.
pub const CHANNEL_BASE: Ipv4Addr = Ipv4Addr::new(233, 0, 0, 1);

/// Last address of the channel range, 233.255.255.255.
pub const CHANNEL_LAST: Ipv4Addr = Ipv4Addr::new(233, 255, 255, 255);

/// Pluggable allocation policy for channel addresses.
pub trait ChannelAllocator: fmt::Debug + Send + Sync {
    /// Hands out an address, or `None` if the pool is exhausted.
    fn allocate(&mut self) -> Option<Ipv4Addr>;

    /// Marks an address chosen elsewhere as in use.
    fn claim(&mut self, addr: Ipv4Addr);

    /// Returns an address to the pool.
    fn release(&mut self, addr: Ipv4Addr);
}

/// Pool of size one: every document shares `CHANNEL_BASE`.
#[derive(Debug, Default)]
pub struct SingleAddressAllocator;

impl ChannelAllocator for SingleAddressAllocator {
    fn allocate(&mut self) -> Option<Ipv4Addr> {
        Some(CHANNEL_BASE)
    }

    fn claim(&mut self, _addr: Ipv4Addr) {}

    fn release(&mut self, _addr: Ipv4Addr) {}
}

/// Range of `size` consecutive addresses starting at `CHANNEL_BASE`;
/// released addresses are reused lowest first.
#[derive(Debug)]
pub struct RangeAllocator {
    /// Next never-handed-out address.
    next: u32,

    /// Last address of the range (inclusive).
    last: u32,

    /// Addresses handed out and later released.
    released: BTreeSet<u32>,

    /// Addresses currently in use.
    in_use: BTreeSet<u32>,
}

impl RangeAllocator {
    pub fn new(size: u32) -> Self {
        let base = u32::from(CHANNEL_BASE);
        let span = u32::from(CHANNEL_LAST) - base;
        RangeAllocator {
            next: base,
            last: base + size.saturating_sub(1).min(span),
            released: BTreeSet::new(),
            in_use: BTreeSet::new(),
        }
    }

    fn contains(&self, addr: u32) -> bool {
        addr >= u32::from(CHANNEL_BASE) && addr <= self.last
    }
}

impl ChannelAllocator for RangeAllocator {
    fn allocate(&mut self) -> Option<Ipv4Addr> {
        if let Some(addr) = self.released.pop_first() {
            self.in_use.insert(addr);
            return Some(Ipv4Addr::from(addr));
        }
        while self.next <= self.last {
            let addr = self.next;
            self.next += 1;
            if self.in_use.insert(addr) {
                return Some(Ipv4Addr::from(addr));
            }
        }
        None
    }

    fn claim(&mut self, addr: Ipv4Addr) {
        let addr = u32::from(addr);
        if self.contains(addr) {
            self.released.remove(&addr);
            self.in_use.insert(addr);
        }
    }

    fn release(&mut self, addr: Ipv4Addr) {
        let addr = u32::from(addr);
        if self.in_use.remove(&addr) {
            self.released.insert(addr);
        }
    }
}

/// Builds the allocator for a configured pool size.
pub fn allocator_for_pool(size: u32) -> Box<dyn ChannelAllocator> {
    if size > 1 {
        Box::new(RangeAllocator::new(size))
    } else {
        Box::new(SingleAddressAllocator)
    }
}

/// Document name -> channel address, alive while any section of the
/// document is being edited.
#[derive(Debug)]
pub struct ChannelTable {
    allocator: Mutex<Box<dyn ChannelAllocator>>,
    channels: RwLock<HashMap<String, Ipv4Addr>>,
}

impl ChannelTable {
    pub fn new(allocator: Box<dyn ChannelAllocator>) -> Self {
        ChannelTable {
            allocator: Mutex::new(allocator),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the document's channel, reserving a fresh one if it has none.
    pub fn reserve(&self, document: &str) -> Option<Ipv4Addr> {
        let mut channels = self.channels.write();
        if let Some(addr) = channels.get(document) {
            return Some(*addr);
        }
        let addr = self.allocator.lock().allocate()?;
        channels.insert(document.into(), addr);
        Some(addr)
    }

    /// Records a channel decided elsewhere, keeping an existing one.
    pub fn record(&self, document: &str, addr: Ipv4Addr) -> Ipv4Addr {
        let mut channels = self.channels.write();
        *channels.entry(document.into()).or_insert_with(|| {
            self.allocator.lock().claim(addr);
            addr
        })
    }

    pub fn get(&self, document: &str) -> Option<Ipv4Addr> {
        self.channels.read().get(document).copied()
    }

    /// Retires the document's channel, returning it to the pool.
    pub fn retire(&self, document: &str) -> Option<Ipv4Addr> {
        let addr = self.channels.write().remove(document)?;
        self.allocator.lock().release(addr);
        Some(addr)
    }

    pub fn to_records(&self) -> Vec<(String, Ipv4Addr)> {
        let mut records: Vec<_> = self
            .channels
            .read()
            .iter()
            .map(|(doc, addr)| (doc.clone(), *addr))
            .collect();
        records.sort();
        records
    }

    pub fn replace_all(&self, records: Vec<(String, Ipv4Addr)>) {
        let mut allocator = self.allocator.lock();
        for (_, addr) in &records {
            allocator.claim(*addr);
        }
        *self.channels.write() = records.into_iter().collect();
    }
}
