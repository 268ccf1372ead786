//! Migration observability.
//!
//! The migrator reports its progress through an injected
//! [`MigrationObserver`] instead of a process-wide logger, so callers and
//! tests can watch phase transitions directly.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::MigrateError;

/// Phases of a rebuild migration.
///
/// A rebuild moves forward through `Planned`, `ShadowCreated`, `DataCopied`,
/// `Swapped`, `IndexesRebuilt` and ends in `Verified`. A failure at any step
/// ends in `RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPhase {
    /// Plan computed, nothing executed yet.
    Planned,
    /// Shadow table created with the desired columns.
    ShadowCreated,
    /// Rows copied from the source table into the shadow table.
    DataCopied,
    /// Source dropped and shadow renamed to the source name.
    Swapped,
    /// Indexes, views and triggers recreated on the swapped table.
    IndexesRebuilt,
    /// Committed and verified against the desired shape.
    Verified,
    /// Transaction rolled back; the source table is untouched.
    RolledBack,
}

impl RebuildPhase {
    /// Returns the phase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::ShadowCreated => "shadow_created",
            Self::DataCopied => "data_copied",
            Self::Swapped => "swapped",
            Self::IndexesRebuilt => "indexes_rebuilt",
            Self::Verified => "verified",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for RebuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives structured events from the migrator.
///
/// All methods default to doing nothing.
pub trait MigrationObserver: Send + Sync {
    /// Called when a rebuild enters `phase`.
    fn on_phase_enter(&self, table: &str, phase: RebuildPhase) {
        let _ = (table, phase);
    }

    /// Called after an additive migration issued `ADD COLUMN` for `column`.
    fn on_column_added(&self, table: &str, column: &str) {
        let _ = (table, column);
    }

    /// Called when a migration fails. `phase` is the last phase entered for
    /// rebuilds and `None` for additive migrations.
    fn on_error(&self, table: &str, phase: Option<RebuildPhase>, error: &MigrateError) {
        let _ = (table, phase, error);
    }
}

/// Observer that emits `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl MigrationObserver for TracingObserver {
    fn on_phase_enter(&self, table: &str, phase: RebuildPhase) {
        match phase {
            RebuildPhase::Verified => info!(table = %table, "Rebuild verified"),
            RebuildPhase::RolledBack => warn!(table = %table, "Rebuild rolled back"),
            _ => debug!(table = %table, phase = %phase, "Entering rebuild phase"),
        }
    }

    fn on_column_added(&self, table: &str, column: &str) {
        debug!(table = %table, column = %column, "Column added");
    }

    fn on_error(&self, table: &str, phase: Option<RebuildPhase>, error: &MigrateError) {
        match phase {
            Some(phase) => {
                warn!(table = %table, phase = %phase, error = %error, "Migration failed");
            }
            None => warn!(table = %table, error = %error, "Migration failed"),
        }
    }
}

impl<O: MigrationObserver + ?Sized> MigrationObserver for &O {
    fn on_phase_enter(&self, table: &str, phase: RebuildPhase) {
        (**self).on_phase_enter(table, phase);
    }

    fn on_column_added(&self, table: &str, column: &str) {
        (**self).on_column_added(table, column);
    }

    fn on_error(&self, table: &str, phase: Option<RebuildPhase>, error: &MigrateError) {
        (**self).on_error(table, phase, error);
    }
}
