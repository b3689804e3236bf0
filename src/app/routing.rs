//! Routing engine: classifies a target account as internal, external or unknown.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::domain::{BankProfile, ConfigError, InternalLedger, PrefixRoute, RoutingDecision};

/// Immutable registry of the internal ledger, partner banks and the
/// account-prefix table. Built once at startup.
#[derive(Debug, Clone)]
pub struct BankRegistry {
    internal: InternalLedger,
    banks: Vec<BankProfile>,
    index: HashMap<String, usize>,
    /// Sorted by descending prefix length so the most specific prefix wins.
    prefix_routes: Vec<PrefixRoute>,
}

impl BankRegistry {
    pub fn new(
        internal: InternalLedger,
        banks: Vec<BankProfile>,
        mut prefix_routes: Vec<PrefixRoute>,
    ) -> Result<Self, ConfigError> {
        if internal.account_prefix.is_empty() {
            return Err(ConfigError::invalid(
                "INTERNAL_ACCOUNT_PREFIX",
                "must not be empty",
            ));
        }

        let mut index = HashMap::with_capacity(banks.len());
        for (pos, bank) in banks.iter().enumerate() {
            if bank.code.is_empty() {
                return Err(ConfigError::invalid("EXTERNAL_BANKS", "empty bank code"));
            }
            if index.insert(bank.code.clone(), pos).is_some() {
                return Err(ConfigError::invalid(
                    "EXTERNAL_BANKS",
                    format!("duplicate bank code '{}'", bank.code),
                ));
            }
        }

        for route in &prefix_routes {
            if !index.contains_key(&route.bank_code) {
                return Err(ConfigError::invalid(
                    format!("{}_PREFIXES", route.bank_code),
                    "prefix points to an unconfigured bank",
                ));
            }
            if route.prefix.starts_with(&internal.account_prefix) {
                return Err(ConfigError::invalid(
                    format!("{}_PREFIXES", route.bank_code),
                    format!(
                        "prefix '{}' is shadowed by the internal prefix '{}'",
                        route.prefix, internal.account_prefix
                    ),
                ));
            }
        }
        for (i, a) in prefix_routes.iter().enumerate() {
            if let Some(b) = prefix_routes[i + 1..].iter().find(|b| b.prefix == a.prefix) {
                if b.bank_code != a.bank_code {
                    return Err(ConfigError::invalid(
                        format!("{}_PREFIXES", b.bank_code),
                        format!("prefix '{}' already mapped to {}", a.prefix, a.bank_code),
                    ));
                }
            }
        }

        prefix_routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Ok(Self {
            internal,
            banks,
            index,
            prefix_routes,
        })
    }

    #[must_use]
    pub fn internal(&self) -> &InternalLedger {
        &self.internal
    }

    /// Partner banks in configuration order.
    #[must_use]
    pub fn banks(&self) -> &[BankProfile] {
        &self.banks
    }

    #[must_use]
    pub fn bank(&self, code: &str) -> Option<&BankProfile> {
        self.index.get(code).map(|&pos| &self.banks[pos])
    }

    /// Longest per-call deadline across the ledger and every partner bank.
    #[must_use]
    pub fn max_timeout_ms(&self) -> u64 {
        self.banks
            .iter()
            .map(|bank| bank.timeout_ms)
            .fold(self.internal.timeout_ms, u64::max)
    }

    #[must_use]
    pub fn is_internal_account(&self, account: &str) -> bool {
        account.starts_with(&self.internal.account_prefix)
    }

    /// Bank code owning the longest configured prefix of `account`.
    #[must_use]
    pub fn identify_external_bank(&self, account: &str) -> Option<&str> {
        self.prefix_routes
            .iter()
            .find(|route| account.starts_with(&route.prefix))
            .map(|route| route.bank_code.as_str())
    }
}

/// Maps destination accounts onto routing decisions. Read-only after startup.
#[derive(Debug, Clone)]
pub struct RoutingEngine {
    registry: Arc<BankRegistry>,
}

impl RoutingEngine {
    #[must_use]
    pub fn new(registry: Arc<BankRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &BankRegistry {
        &self.registry
    }

    /// Classifies `target_account`.
    ///
    /// Unknown covers both an unmapped prefix and a mapped but disabled bank;
    /// callers treat it as terminal.
    #[must_use]
    pub fn route(&self, target_account: &str) -> RoutingDecision {
        if self.registry.is_internal_account(target_account) {
            return RoutingDecision::internal(self.registry.internal());
        }

        let Some(code) = self.registry.identify_external_bank(target_account) else {
            debug!("No bank prefix matches target account");
            return RoutingDecision::unknown();
        };

        match self.registry.bank(code) {
            Some(profile) if profile.enabled => RoutingDecision::external(profile),
            Some(_) => {
                debug!(bank_code = %code, "Matched bank is disabled");
                RoutingDecision::unknown()
            }
            None => RoutingDecision::unknown(),
        }
    }
}
