//! Mint → token program lookup cache.
//!
//! Instruction builders need to know whether a mint belongs to SPL Token or
//! Token-2022. The answer never changes for a given mint, so lookups are
//! cached for the lifetime of the owning handle. The cache is unbounded;
//! the number of mints an agent touches is small.

use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::rpc::{LedgerRpc, RpcError};

/// SPL Token program id.
pub const SPL_TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");

/// Token-2022 program id.
pub const TOKEN_2022_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb");

/// Which token program owns a mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenProgram {
    SplToken,
    Token2022,
}

impl TokenProgram {
    pub fn from_owner(owner: &Pubkey) -> Option<Self> {
        if *owner == SPL_TOKEN_PROGRAM_ID {
            Some(Self::SplToken)
        } else if *owner == TOKEN_2022_PROGRAM_ID {
            Some(Self::Token2022)
        } else {
            None
        }
    }

    pub fn program_id(&self) -> Pubkey {
        match self {
            Self::SplToken => SPL_TOKEN_PROGRAM_ID,
            Self::Token2022 => TOKEN_2022_PROGRAM_ID,
        }
    }
}

/// Owned cache of mint → token program.
#[derive(Debug, Default)]
pub struct TokenProgramCache {
    programs: DashMap<Pubkey, TokenProgram>,
}

impl TokenProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached entry without I/O.
    pub fn get(&self, mint: &Pubkey) -> Option<TokenProgram> {
        self.programs.get(mint).map(|p| *p)
    }

    /// Seed a known mapping.
    pub fn insert(&self, mint: Pubkey, program: TokenProgram) {
        self.programs.insert(mint, program);
    }

    /// Resolve a mint's token program, fetching its owner on a miss.
    ///
    /// Returns `Ok(None)` for missing accounts and for accounts not owned by
    /// a token program; neither is cached.
    pub async fn resolve(
        &self,
        mint: &Pubkey,
        rpc: &dyn LedgerRpc,
    ) -> Result<Option<TokenProgram>, RpcError> {
        if let Some(program) = self.get(mint) {
            return Ok(Some(program));
        }

        let Some(owner) = rpc.account_owner(mint).await? else {
            warn!(mint = %mint, "Mint account not found");
            return Ok(None);
        };

        match TokenProgram::from_owner(&owner) {
            Some(program) => {
                debug!(mint = %mint, program = ?program, "Token program resolved");
                self.programs.insert(*mint, program);
                Ok(Some(program))
            }
            None => {
                warn!(mint = %mint, owner = %owner, "Account is not owned by a token program");
                Ok(None)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}
