use std::{fs, path};

use crate::error::CoreError;

const PAGE: usize = 65536;

// 128x128 tiles, 8 dimensions
const TILE_ENTRIES: usize = 128 * 128 * 8;

// Blue-noise sampling tables widened to one u32 per 8-bit entry.
// Page 0 holds the Sobol sequence, pages 1-2 the scrambling tiles,
// pages 3-4 the ranking tiles
#[derive(Clone, Debug, PartialEq)]
pub struct BlueNoise(Vec<u32>);

impl BlueNoise {
    pub const LEN: usize = PAGE * 5;

    pub fn pack(sobol: &[u8], scrambling: &[u8], ranking: &[u8]) -> anyhow::Result<Self> {
        fn check(table: &'static str, data: &[u8], expected: usize) -> Result<(), CoreError> {
            if data.len() == expected {
                Ok(())
            } else {
                Err(CoreError::BlueNoiseSize { table, len: data.len(), expected })
            }
        }

        check("sobol", sobol, PAGE)?;
        check("scrambling", scrambling, TILE_ENTRIES)?;
        check("ranking", ranking, TILE_ENTRIES)?;

        let mut packed = vec![0u32; Self::LEN];

        let pages = [(0, sobol), (PAGE, scrambling), (PAGE * 3, ranking)];
        for (start, table) in pages {
            packed[start..(start + table.len())]
                .iter_mut()
                .zip(table)
                .for_each(|(dst, &src)| *dst = src as u32);
        }

        Ok(Self(packed))
    }

    // Reads `sobol.bin`, `scrambling.bin` and `ranking.bin`
    pub fn load(dir: &path::Path) -> anyhow::Result<Self> {
        let read = |name: &str| -> anyhow::Result<Vec<u8>> {
            let path = dir.join(name);

            fs::read(&path).map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))
        };

        Self::pack(&read("sobol.bin")?, &read("scrambling.bin")?, &read("ranking.bin")?)
    }

    // Deterministic stand-in with the right shape, for when no tables ship
    pub fn generated() -> Self {
        let mut state = 0x9E37_79B9u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        };

        let sobol = (0..PAGE).map(|_| next()).collect::<Vec<_>>();
        let scrambling = (0..TILE_ENTRIES).map(|_| next()).collect::<Vec<_>>();
        let ranking = (0..TILE_ENTRIES).map(|_| next()).collect::<Vec<_>>();

        match Self::pack(&sobol, &scrambling, &ranking) {
            Ok(noise) => noise,
            Err(_) => unreachable!("generated tables have the packed sizes"),
        }
    }

    pub fn from_config(dir: Option<&path::Path>) -> anyhow::Result<Self> {
        match dir {
            Some(dir) => Self::load(dir),
            None => {
                log::warn!("no blue-noise tables configured, sampling with hashed tables");

                Ok(Self::generated())
            },
        }
    }

    pub fn as_slice(&self) -> &[u32] { &self.0 }
}
