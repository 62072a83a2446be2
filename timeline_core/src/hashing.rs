use std::hash::Hasher;

use frame_schema::FramePayload;

/// A deterministic FNV-1a 64-bit hasher.
///
/// Used for content signatures that must be stable across runs, unlike
/// `DefaultHasher`.
#[derive(Debug)]
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}

/// Content key for frames that carry no producer timestamp.
///
/// Covers the player roster and hotspot counts, which is what changes between
/// live polls.
pub fn payload_signature(payload: &FramePayload) -> String {
    let mut hasher = FnvHasher::new();
    hasher.write_usize(payload.players.len());
    for player in &payload.players {
        hasher.write(player.identity().unwrap_or("").as_bytes());
        if let Some(zone) = player.zone {
            hasher.write_i32(zone.zx);
            hasher.write_i32(zone.zy);
        }
        if let Some(position) = player.position {
            hasher.write_u64(position.x.to_bits());
            hasher.write_u64(position.z.to_bits());
        }
    }
    hasher.write_usize(payload.hotspots.len());
    for hotspot in &payload.hotspots {
        hasher.write_i32(hotspot.zone.zx);
        hasher.write_i32(hotspot.zone.zy);
        hasher.write_u64(hotspot.count.to_bits());
    }
    hasher.write_usize(payload.transitions.len());
    format!("sig:{:016x}", hasher.finish())
}
