//! Built-in chain schedules.

use super::{ChainConfig, EngineKind, Fork};
use alloy_primitives::{b256, U256};

const BYZANTIUM: &[Fork] = &[
    Fork::Eip100B,
    Fork::Eip140,
    Fork::Eip198,
    Fork::Eip211,
    Fork::Eip212,
    Fork::Eip213,
    Fork::Eip214,
    Fork::Eip658,
];

const CONSTANTINOPLE: &[Fork] = &[Fork::Eip145, Fork::Eip1014, Fork::Eip1052];

const ISTANBUL: &[Fork] = &[
    Fork::Eip152,
    Fork::Eip1108,
    Fork::Eip1344,
    Fork::Eip1884,
    Fork::Eip2028,
    Fork::Eip2200,
];

const BERLIN: &[Fork] = &[Fork::Eip2565, Fork::Eip2718, Fork::Eip2929, Fork::Eip2930];

const LONDON: &[Fork] = &[
    Fork::Eip1559,
    Fork::Eip3198,
    Fork::Eip3529,
    Fork::Eip3541,
    Fork::Eip3554,
];

const SHANGHAI: &[Fork] = &[
    Fork::Eip3651,
    Fork::Eip3855,
    Fork::Eip3860,
    Fork::Eip4895,
    Fork::Eip6049,
];

const CANCUN: &[Fork] = &[
    Fork::Eip1153,
    Fork::Eip4788,
    Fork::Eip4844,
    Fork::Eip5656,
    Fork::Eip6780,
    Fork::Eip7516,
];

/// Frontier through Homestead and the 2016 repricing, shared by every preset.
const EARLY: &[Fork] = &[
    Fork::Eip2,
    Fork::Eip7,
    Fork::Eip150,
    Fork::Eip155,
    Fork::Eip160,
    Fork::Eip161,
    Fork::Eip170,
];

impl ChainConfig {
    /// Ethereum Classic mainnet.
    pub fn classic() -> Self {
        let mut config = ChainConfig::new(61, EngineKind::Ethash)
            .with_forks(&[Fork::Eip2, Fork::Eip7], 1_150_000)
            .with_fork(Fork::Eip150, 2_500_000)
            .with_forks(&[Fork::Eip155, Fork::Eip160], 3_000_000)
            .with_fork(Fork::Ecip1010Pause, 3_000_000)
            .with_fork(Fork::Ecip1017, 5_000_000)
            .with_fork(Fork::Ecip1041, 5_900_000)
            // Atlantis
            .with_forks(&[Fork::Eip161, Fork::Eip170], 8_772_000)
            .with_forks(BYZANTIUM, 8_772_000)
            // Agharta
            .with_forks(CONSTANTINOPLE, 9_573_000)
            // Phoenix
            .with_forks(ISTANBUL, 10_500_839)
            .with_fork(Fork::Ecbp1100, 11_380_000)
            // Thanos
            .with_fork(Fork::Ecip1099, 11_700_000)
            // Magneto
            .with_forks(BERLIN, 13_189_133)
            // Mystique
            .with_forks(&[Fork::Eip3529, Fork::Eip3541], 14_525_000)
            // Spiral
            .with_forks(
                &[Fork::Eip3651, Fork::Eip3855, Fork::Eip3860, Fork::Eip6049],
                19_250_000,
            )
            .with_fork(Fork::Ecbp1100Deactivate, 19_250_000);
        config.ecip1010_length = Some(2_000_000);
        config.ecip1017_era_rounds = Some(5_000_000);
        config.require_block_hashes.insert(
            1_920_000,
            b256!("94365e3a8c0b35089c1d1195081fe7489b528a84b22199c916180db8b28ade7f"),
        );
        config.require_block_hashes.insert(
            2_500_000,
            b256!("ca12c63534f565899681965528d536c52cb05b7c48e269c2a6cb77ad864d878a"),
        );
        config
    }

    /// Ethereum mainnet up to the merge.
    pub fn mainnet() -> Self {
        let mut config = ChainConfig::new(1, EngineKind::Ethash)
            .with_forks(&[Fork::Eip2, Fork::Eip7], 1_150_000)
            .with_fork(Fork::Eip779, 1_920_000)
            .with_fork(Fork::Eip150, 2_463_000)
            .with_forks(
                &[Fork::Eip155, Fork::Eip160, Fork::Eip161, Fork::Eip170],
                2_675_000,
            )
            .with_forks(BYZANTIUM, 4_370_000)
            .with_fork(Fork::Eip649, 4_370_000)
            .with_forks(CONSTANTINOPLE, 7_280_000)
            .with_forks(&[Fork::Eip1283, Fork::Eip1234, Fork::Petersburg], 7_280_000)
            .with_forks(ISTANBUL, 9_069_000)
            .with_fork(Fork::Eip2384, 9_200_000)
            .with_forks(BERLIN, 12_244_000)
            .with_forks(LONDON, 12_965_000)
            .with_fork(Fork::Eip4345, 13_773_000)
            .with_fork(Fork::Eip5133, 15_050_000);
        // Petersburg removed EIP-1283 again in the same block.
        config.forks.remove(&Fork::Eip1283);
        config.terminal_total_difficulty =
            Some(U256::from(58_750_000_000_000_000_000_000u128));
        for fork in SHANGHAI {
            config.fork_times.insert(*fork, 1_681_338_455);
        }
        for fork in CANCUN {
            config.fork_times.insert(*fork, 1_710_338_135);
        }
        config
    }

    /// MintMe, a Lyra2 chain with every pre-Berlin fork at genesis.
    pub fn mintme() -> Self {
        ChainConfig::new(24734, EngineKind::Lyra2)
            .with_forks(EARLY, 0)
            .with_forks(BYZANTIUM, 0)
            .with_forks(CONSTANTINOPLE, 0)
            .with_forks(ISTANBUL, 0)
            .with_fork(Fork::Ecip1041, 0)
            .with_fork(Fork::Lyra2NonceTransition, 252_500)
    }

    /// Local development chain: every fork through Berlin at genesis, no
    /// bomb, no reward reductions.
    pub fn developer(engine: EngineKind) -> Self {
        ChainConfig::new(1337, engine)
            .with_forks(EARLY, 0)
            .with_forks(BYZANTIUM, 0)
            .with_forks(CONSTANTINOPLE, 0)
            .with_fork(Fork::Petersburg, 0)
            .with_forks(ISTANBUL, 0)
            .with_forks(BERLIN, 0)
            .with_fork(Fork::Ecip1041, 0)
    }
}
