//! Memoized channel remapping between arbitrary channel layouts.
//!
//! A remap table has one entry per destination channel and describes where
//! that channel's samples come from: a single source channel, the mean of
//! all source channels (mono downmix), or a surround-aware combination of
//! classified source channels. Tables are computed once per
//! (source, destination) channel-count pair and shared process-wide.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

/// How one destination channel sources its samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapEntry {
    /// Copy straight from the given source channel index.
    Source(u8),
    /// Average every source channel (downmix to mono).
    MixAll,
    /// Combine classified source channels (surround downmix).
    Surround,
}

/// Positional classification of a source channel in a surround layout.
///
/// Follows the conventional channel order: front left, front right,
/// center, subwoofer, side left, side right, alternate left, alternate
/// right. Channels past the known layout combine into every destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceClass {
    /// A left-positioned channel, mapped to destination channel 0.
    Left,
    /// A right-positioned channel, mapped to destination channel 1.
    Right,
    /// Center/subwoofer material, mixed into every destination channel.
    Combine,
}

const SURROUND_CLASSES: [SourceClass; 8] = [
    SourceClass::Left,    // front left
    SourceClass::Right,   // front right
    SourceClass::Combine, // center
    SourceClass::Combine, // subwoofer
    SourceClass::Left,    // side left
    SourceClass::Right,   // side right
    SourceClass::Left,    // alternate left
    SourceClass::Right,   // alternate right
];

/// Classifies a source channel index for surround downmixing.
#[must_use]
pub fn source_class(src_channel: usize) -> SourceClass {
    SURROUND_CLASSES
        .get(src_channel)
        .copied()
        .unwrap_or(SourceClass::Combine)
}

/// Whether a source channel of the given class contributes to a
/// destination channel during a surround downmix.
#[must_use]
pub fn contributes(class: SourceClass, dst_channel: usize) -> bool {
    match class {
        SourceClass::Combine => true,
        SourceClass::Left => dst_channel == 0,
        SourceClass::Right => dst_channel == 1,
    }
}

static REMAP_CACHE: RwLock<Option<HashMap<(u16, u16), Arc<[RemapEntry]>>>> = RwLock::new(None);

/// Returns the remap table for a (source, destination) channel-count pair.
///
/// The table is computed on first request and read-only afterwards.
/// Redundant computation during a race is harmless since the result is
/// identical.
#[must_use]
pub fn remap_for(src_channels: u16, dst_channels: u16) -> Arc<[RemapEntry]> {
    let key = (src_channels, dst_channels);

    {
        let cache = REMAP_CACHE.read();
        if let Some(map) = cache.as_ref().and_then(|c| c.get(&key)) {
            return Arc::clone(map);
        }
    }

    let map = compute_remap(src_channels, dst_channels);
    let mut cache = REMAP_CACHE.write();
    cache
        .get_or_insert_with(HashMap::new)
        .entry(key)
        .or_insert_with(|| Arc::clone(&map));
    map
}

/// Drops every memoized remap table. Intended for tests.
pub fn reset_remap_cache() {
    *REMAP_CACHE.write() = None;
}

fn compute_remap(src_channels: u16, dst_channels: u16) -> Arc<[RemapEntry]> {
    // Fewer destination channels than source means a downmix: everything
    // into one channel for mono, classified combining otherwise.
    let mix_down = dst_channels < src_channels;
    let mix_down_entry = if dst_channels == 1 {
        RemapEntry::MixAll
    } else {
        RemapEntry::Surround
    };

    (0..dst_channels)
        .map(|i| {
            if mix_down {
                mix_down_entry
            } else {
                RemapEntry::Source((i % src_channels) as u8)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::audio::remap::{
        RemapEntry, SourceClass, contributes, remap_for, reset_remap_cache, source_class,
    };

    #[test]
    fn test_equal_channels_map_directly() {
        let map = remap_for(2, 2);
        assert_eq!(&map[..], &[RemapEntry::Source(0), RemapEntry::Source(1)]);
    }

    #[test]
    fn test_upmix_wraps_source_channels() {
        let map = remap_for(2, 6);
        let expected: Vec<RemapEntry> = (0..6).map(|i| RemapEntry::Source(i % 2)).collect();
        assert_eq!(&map[..], &expected[..]);
    }

    #[test]
    fn test_downmix_to_mono_combines_all() {
        let map = remap_for(6, 1);
        assert_eq!(&map[..], &[RemapEntry::MixAll]);
    }

    #[test]
    fn test_downmix_to_multichannel_is_surround() {
        let map = remap_for(8, 6);
        assert!(map.iter().all(|e| *e == RemapEntry::Surround));
        assert_eq!(map.len(), 6);
    }

    #[test]
    fn test_memoization_returns_shared_table() {
        reset_remap_cache();
        let first = remap_for(4, 2);
        let second = remap_for(4, 2);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_surround_classification() {
        assert_eq!(source_class(0), SourceClass::Left);
        assert_eq!(source_class(1), SourceClass::Right);
        assert_eq!(source_class(2), SourceClass::Combine);
        assert_eq!(source_class(3), SourceClass::Combine);
        assert_eq!(source_class(4), SourceClass::Left);
        assert_eq!(source_class(5), SourceClass::Right);
        // Past the known layout everything combines.
        assert_eq!(source_class(11), SourceClass::Combine);
    }

    #[test]
    fn test_contribution_rules() {
        assert!(contributes(SourceClass::Left, 0));
        assert!(!contributes(SourceClass::Left, 1));
        assert!(contributes(SourceClass::Right, 1));
        assert!(!contributes(SourceClass::Right, 0));
        assert!(contributes(SourceClass::Combine, 0));
        assert!(contributes(SourceClass::Combine, 5));
    }
}
