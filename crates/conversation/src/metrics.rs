//! Métriques de session (lecture seule, dérivées de l'état)

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{MessageSet, Role};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Temps écoulé depuis le dernier `connect()` réussi
    pub elapsed: Duration,
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
}

impl SessionMetrics {
    pub(crate) fn compute(messages: &MessageSet, started_at: Instant) -> Self {
        Self {
            elapsed: started_at.elapsed(),
            total_messages: messages.len(),
            user_messages: messages.count_by_role(Role::User),
            assistant_messages: messages.count_by_role(Role::Assistant),
        }
    }

    /// Temps passé, en minutes entières ("3m")
    pub fn time_spent(&self) -> String {
        format!("{}m", self.elapsed.as_secs() / 60)
    }
}
