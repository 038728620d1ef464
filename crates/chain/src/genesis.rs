//! Built-in genesis blocks.
//!
//! Two fixtures exist: `legacy` reproduces the original network launch
//! parameters, `new` is the current default. Both are fully deterministic.

use umbra_types::{Block, BlockHeader, Hash, Seed};

/// Which genesis fixture to boot from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenesisKind {
    /// The original network launch block
    Legacy,
    /// The current default genesis
    New,
}

impl std::str::FromStr for GenesisKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(GenesisKind::Legacy),
            "new" => Ok(GenesisKind::New),
            other => Err(format!("unknown genesis kind '{}'", other)),
        }
    }
}

/// The genesis block of the chosen fixture.
pub fn genesis_block(kind: GenesisKind) -> Block {
    let header = match kind {
        GenesisKind::Legacy => BlockHeader {
            height: 0,
            timestamp: 1_569_369_600, // 2019-09-25, the original launch
            seed: Seed::ZERO,
            state_root: Hash::sha3(b"umbra-genesis-legacy"),
            ..Default::default()
        },
        GenesisKind::New => BlockHeader {
            height: 0,
            timestamp: 1_609_459_200, // 2021-01-01
            seed: Seed::ZERO,
            state_root: Hash::sha3(b"umbra-genesis"),
            ..Default::default()
        },
    };
    Block {
        header,
        txs: Vec::new(),
    }
}
