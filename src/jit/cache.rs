/*!
Block cache: three lookup tiers keyed the way guest addresses are laid
out, a fixed pool of code slots, and the LRU list that decides which block
dies under memory pressure.

The tiers are dense arrays of code addresses living in *host* memory so
the dispatcher and patch helper can index them from generated code; the
Rust side keeps the per-slot metadata. A code address maps back to its
slot by position, since all slots are the same size. LRU node index and
code slot index are the same number, which dissolves the block <-> node
cycle into plain array indices.
*/

use log::{debug, info};

use super::block::{CodeBlock, CODE_CAPACITY};
use super::dispatch::{JMP_L, PATCH_SITE_TEMPLATE};
use crate::m68k::{ExecError, HostMem, Machine};

pub const MAX_BLOCKS: usize = 4096;
pub const BANK0_SPAN: u32 = 0x4000;
pub const BANKED_SPAN: u32 = 0x4000;
pub const UPPER_SPAN: u32 = 0x8000;
pub const MAX_ROM_BANKS: u32 = 256;

const NIL: u16 = u16::MAX;

/// Rust-side record for a published block.
struct Slot {
    src_address: u16,
    end_address: u16,
    bank: u8,
    len: u16,
    patch_sites: Vec<u16>,
}

struct Node {
    next: u16,
    prev: u16,
    pc: u16,
    bank: u8,
    in_use: bool,
}

pub struct BlockCache {
    bank0_tier: u32,
    banked_tier: u32,
    upper_tier: u32,
    code_base: u32,
    slots: Vec<Option<Slot>>,
    nodes: Vec<Node>,
    head: u16,
    tail: u16,
    free: u16,
    live: usize,
}

impl BlockCache {
    /// Allocate the tier arrays and the code-slot pool. These allocations
    /// are session-lifetime; per-bank rows come later from the flushable
    /// part of the arena.
    pub fn new(machine: &mut Machine) -> Result<Self, ExecError> {
        let bank0_tier = machine.alloc(BANK0_SPAN * 4)?;
        let upper_tier = machine.alloc(UPPER_SPAN * 4)?;
        let banked_tier = machine.alloc(MAX_ROM_BANKS * 4)?;
        let code_base = machine.alloc((MAX_BLOCKS * CODE_CAPACITY) as u32)?;

        let mut nodes = Vec::with_capacity(MAX_BLOCKS);
        for k in 0..MAX_BLOCKS {
            nodes.push(Node {
                next: if k + 1 < MAX_BLOCKS { (k + 1) as u16 } else { NIL },
                prev: NIL,
                pc: 0,
                bank: 0,
                in_use: false,
            });
        }

        Ok(BlockCache {
            bank0_tier,
            banked_tier,
            upper_tier,
            code_base,
            slots: (0..MAX_BLOCKS).map(|_| None).collect(),
            nodes,
            head: NIL,
            tail: NIL,
            free: 0,
            live: 0,
        })
    }

    pub fn tier_addrs(&self) -> (u32, u32, u32) {
        (self.bank0_tier, self.banked_tier, self.upper_tier)
    }

    pub fn slot_addr(&self, slot: u16) -> u32 {
        self.code_base + slot as u32 * CODE_CAPACITY as u32
    }

    fn slot_of_addr(&self, addr: u32) -> u16 {
        ((addr - self.code_base) / CODE_CAPACITY as u32) as u16
    }

    pub fn live_blocks(&self) -> usize {
        self.live
    }

    /// Host-memory address of the tier entry for (pc, bank), or None when
    /// the banked row does not exist yet.
    fn entry_addr(&self, mem: &HostMem, pc: u16, bank: u8) -> Option<u32> {
        let pc = pc as u32;
        if pc < 0x4000 {
            Some(self.bank0_tier + pc * 4)
        } else if pc < 0x8000 {
            let row = mem.read32(self.banked_tier + bank as u32 * 4);
            if row == 0 {
                None
            } else {
                Some(row + (pc - 0x4000) * 4)
            }
        } else {
            Some(self.upper_tier + (pc - 0x8000) * 4)
        }
    }

    pub fn lookup(&self, mem: &HostMem, pc: u16, bank: u8) -> Option<u16> {
        let entry = self.entry_addr(mem, pc, bank)?;
        let code = mem.read32(entry);
        if code == 0 {
            None
        } else {
            Some(self.slot_of_addr(code))
        }
    }

    /// Publish a freshly compiled block: claim a slot (evicting if the
    /// pool is full), copy the code image into host memory, link the LRU
    /// node at the front, and store the code address in its tier.
    pub fn insert(&mut self, machine: &mut Machine, block: &CodeBlock) -> Result<u16, ExecError> {
        debug_assert!(block.error.is_none());
        debug_assert!(!block.overflowed());

        if self.free == NIL {
            self.evict_one(machine);
        }
        let slot = self.free;
        debug_assert_ne!(slot, NIL);

        // Banked rows are allocated on first store; this is the allocation
        // that can fail and trigger the driver's flush-and-retry.
        let pc = block.src_address;
        let bank = block.bank;
        if (0x4000..0x8000).contains(&pc) {
            let row_slot = self.banked_tier + bank as u32 * 4;
            if machine.mem.read32(row_slot) == 0 {
                let row = machine.alloc(BANKED_SPAN * 4)?;
                machine.mem.write32(row_slot, row);
            }
        }

        self.free = self.nodes[slot as usize].next;

        let addr = self.slot_addr(slot);
        machine.mem.copy_in(addr, &block.code[..]);

        self.slots[slot as usize] = Some(Slot {
            src_address: pc,
            end_address: block.end_address,
            bank,
            len: block.len as u16,
            patch_sites: block.patch_sites.clone(),
        });

        {
            let node = &mut self.nodes[slot as usize];
            node.pc = pc;
            node.bank = bank;
            node.in_use = true;
        }
        self.push_front(slot);
        self.live += 1;

        let entry = self
            .entry_addr(&machine.mem, pc, bank)
            .expect("row allocated above");
        machine.mem.write32(entry, addr);
        Ok(slot)
    }

    fn unlink(&mut self, slot: u16) {
        let (prev, next) = {
            let n = &self.nodes[slot as usize];
            (n.prev, n.next)
        };
        if prev != NIL {
            self.nodes[prev as usize].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next as usize].prev = prev;
        } else {
            self.tail = prev;
        }
        let n = &mut self.nodes[slot as usize];
        n.prev = NIL;
        n.next = NIL;
    }

    fn push_front(&mut self, slot: u16) {
        let old_head = self.head;
        {
            let n = &mut self.nodes[slot as usize];
            n.prev = NIL;
            n.next = old_head;
        }
        if old_head != NIL {
            self.nodes[old_head as usize].prev = slot;
        } else {
            self.tail = slot;
        }
        self.head = slot;
    }

    /// Move a hit block to the most-recently-used end.
    pub fn promote(&mut self, slot: u16) {
        if self.head == slot {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    /// Drop the least recently used block, restoring every patch site that
    /// jumps into its code first.
    pub fn evict_one(&mut self, machine: &mut Machine) -> bool {
        let victim = self.tail;
        if victim == NIL {
            return false;
        }
        self.unlink(victim);

        let (pc, bank) = {
            let n = &self.nodes[victim as usize];
            (n.pc, n.bank)
        };
        if let Some(entry) = self.entry_addr(&machine.mem, pc, bank) {
            machine.mem.write32(entry, 0);
        }

        self.invalidate_patches_to(&mut machine.mem, self.slot_addr(victim));

        debug!("evict block {bank:02x}:{pc:04x} (slot {victim})");

        self.slots[victim as usize] = None;
        let n = &mut self.nodes[victim as usize];
        n.in_use = false;
        n.next = self.free;
        n.prev = NIL;
        self.free = victim;
        self.live -= 1;
        true
    }

    /// Restore the load-helper/JSR template at every recorded patch site
    /// whose JMP.L targets the given code address. Keeps the invariant
    /// that a patched jump always lands in a live block.
    fn invalidate_patches_to(&self, mem: &mut HostMem, target: u32) {
        for (idx, slot) in self.slots.iter().enumerate() {
            let Some(slot) = slot else { continue };
            let base = self.slot_addr(idx as u16);
            for &site in &slot.patch_sites {
                let at = base + site as u32;
                if mem.slice(at, 2) != &JMP_L[..] {
                    continue;
                }
                if mem.read32(at + 2) == target {
                    mem.copy_in(at, &PATCH_SITE_TEMPLATE);
                }
            }
        }
    }

    /// Evict until a code slot is free. Called before a compile so the
    /// insert that follows cannot stall on pool exhaustion.
    pub fn ensure_headroom(&mut self, machine: &mut Machine) {
        while self.free == NIL {
            if !self.evict_one(machine) {
                break;
            }
        }
    }

    /// Whole-cache flush: clear every tier entry, drop all blocks, release
    /// the per-bank rows back to the arena.
    pub fn flush_all(&mut self, machine: &mut Machine) {
        info!("flushing block cache ({} blocks)", self.live);
        machine.mem.fill(self.bank0_tier, (BANK0_SPAN * 4) as usize, 0);
        machine.mem.fill(self.upper_tier, (UPPER_SPAN * 4) as usize, 0);
        machine.mem.fill(self.banked_tier, (MAX_ROM_BANKS * 4) as usize, 0);
        machine.release_to_mark();

        for slot in &mut self.slots {
            *slot = None;
        }
        for (k, node) in self.nodes.iter_mut().enumerate() {
            node.next = if k + 1 < MAX_BLOCKS { (k + 1) as u16 } else { NIL };
            node.prev = NIL;
            node.in_use = false;
        }
        self.head = NIL;
        self.tail = NIL;
        self.free = 0;
        self.live = 0;
    }

    /// Iterate (slot, start, end, bank) of live blocks; used by tests and
    /// the CLI statistics report.
    pub fn iter_live(&self) -> impl Iterator<Item = (u16, u16, u16, u8)> + '_ {
        self.slots.iter().enumerate().filter_map(|(k, s)| {
            s.as_ref()
                .map(|s| (k as u16, s.src_address, s.end_address, s.bank))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_block(pc: u16, bank: u8) -> CodeBlock {
        let mut b = CodeBlock::new(pc, bank);
        b.moveq_dn(3, 0);
        b.rts();
        b
    }

    fn setup() -> (Machine, BlockCache) {
        let mut m = Machine::new();
        let c = BlockCache::new(&mut m).unwrap();
        m.set_mark();
        (m, c)
    }

    #[test]
    fn lookup_misses_then_hits_after_insert() {
        let (mut m, mut c) = setup();
        assert!(c.lookup(&m.mem, 0x150, 1).is_none());
        let slot = c.insert(&mut m, &dummy_block(0x150, 1)).unwrap();
        assert_eq!(c.lookup(&m.mem, 0x150, 1), Some(slot));
        // bank is irrelevant below 0x4000
        assert_eq!(c.lookup(&m.mem, 0x150, 7), Some(slot));
    }

    #[test]
    fn banked_tier_is_keyed_by_bank() {
        let (mut m, mut c) = setup();
        let s1 = c.insert(&mut m, &dummy_block(0x4000, 1)).unwrap();
        let s2 = c.insert(&mut m, &dummy_block(0x4000, 2)).unwrap();
        assert_ne!(s1, s2);
        assert_eq!(c.lookup(&m.mem, 0x4000, 1), Some(s1));
        assert_eq!(c.lookup(&m.mem, 0x4000, 2), Some(s2));
        assert!(c.lookup(&m.mem, 0x4000, 3).is_none());
    }

    #[test]
    fn upper_tier_covers_wram_and_hram() {
        let (mut m, mut c) = setup();
        let s = c.insert(&mut m, &dummy_block(0xc123, 0)).unwrap();
        assert_eq!(c.lookup(&m.mem, 0xc123, 0), Some(s));
    }

    #[test]
    fn eviction_clears_tier_entry_and_recycles_slot() {
        let (mut m, mut c) = setup();
        let s = c.insert(&mut m, &dummy_block(0x200, 1)).unwrap();
        assert!(c.evict_one(&mut m));
        assert!(c.lookup(&m.mem, 0x200, 1).is_none());
        assert_eq!(c.live_blocks(), 0);
        let s2 = c.insert(&mut m, &dummy_block(0x300, 1)).unwrap();
        assert_eq!(s, s2, "freed slot should be reused");
    }

    #[test]
    fn lru_evicts_least_recently_used_first() {
        let (mut m, mut c) = setup();
        let a = c.insert(&mut m, &dummy_block(0x100, 1)).unwrap();
        let b = c.insert(&mut m, &dummy_block(0x110, 1)).unwrap();
        c.promote(a);
        assert!(c.evict_one(&mut m));
        assert!(c.lookup(&m.mem, 0x110, 1).is_none(), "b was LRU");
        assert_eq!(c.lookup(&m.mem, 0x100, 1), Some(a));
        let _ = b;
    }

    #[test]
    fn eviction_restores_patched_jumps_into_victim() {
        let (mut m, mut c) = setup();
        // A block with one patch site, patched to JMP.L into the victim.
        let mut src = CodeBlock::new(0x100, 1);
        src.moveq_dn(3, 0);
        src.patchable_exit();
        let site = src.patch_sites[0];
        let src_slot = c.insert(&mut m, &src).unwrap();

        let victim_slot = c.insert(&mut m, &dummy_block(0x200, 1)).unwrap();
        let victim_addr = c.slot_addr(victim_slot);

        // Simulate the patch helper's rewrite.
        let at = c.slot_addr(src_slot) + site as u32;
        m.mem.copy_in(at, &JMP_L);
        m.mem.write32(at + 2, victim_addr);

        // Evicting the source block first must leave the site alone;
        // promote it so the victim goes first.
        c.promote(src_slot);
        assert!(c.evict_one(&mut m));
        assert_eq!(m.mem.slice(at, 6), &PATCH_SITE_TEMPLATE);
    }

    #[test]
    fn flush_all_releases_bank_rows() {
        let (mut m, mut c) = setup();
        let before = m.arena_remaining();
        c.insert(&mut m, &dummy_block(0x4000, 3)).unwrap();
        assert!(m.arena_remaining() < before);
        c.flush_all(&mut m);
        assert_eq!(m.arena_remaining(), before);
        assert!(c.lookup(&m.mem, 0x4000, 3).is_none());
        assert_eq!(c.live_blocks(), 0);
    }

    #[test]
    fn pool_exhaustion_evicts_tail() {
        let (mut m, mut c) = setup();
        for k in 0..MAX_BLOCKS as u32 {
            let pc = 0x8000 + k as u16;
            c.insert(&mut m, &dummy_block(pc, 0)).unwrap();
        }
        assert_eq!(c.live_blocks(), MAX_BLOCKS);
        // one more forces an eviction of the very first block
        c.insert(&mut m, &dummy_block(0x100, 1)).unwrap();
        assert_eq!(c.live_blocks(), MAX_BLOCKS);
        assert!(c.lookup(&m.mem, 0x8000, 0).is_none());
    }
}
