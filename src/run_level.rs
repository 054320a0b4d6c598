use std::fmt;

use serde::Serialize;

/// Scope of a [`RunLevel`] comparison, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Scope {
    Global,
    Stage,
    ExecGroup,
    ClientGroup,
    Client,
    Iter,
    Trx,
    Statement,
}

/// Position of a client (and optionally its current trx and statement) in a run.
///
/// Fields are ordered outermost first, so the derived ordering is the run order.
/// Identification only: nothing here owns anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct RunLevel {
    pub stage: u32,
    pub exec_group: u32,
    pub client_group: u32,
    pub client: u32,
    pub trx: u32,
    pub query: u32,
}

impl RunLevel {
    /// Short human-readable client identifier: `stage/exec_group/client_group/client`.
    #[must_use]
    pub fn client_id(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.stage, self.exec_group, self.client_group, self.client
        )
    }

    /// True if any level strictly above `scope` increased relative to `prev`.
    ///
    /// Levels are compared outermost first; the first level that differs decides.
    #[must_use]
    pub fn greater_than(&self, prev: RunLevel, scope: Scope) -> bool {
        let levels = [
            (Scope::Stage, self.stage, prev.stage),
            (Scope::ExecGroup, self.exec_group, prev.exec_group),
            (Scope::ClientGroup, self.client_group, prev.client_group),
            (Scope::Client, self.client, prev.client),
            (Scope::Trx, self.trx, prev.trx),
            (Scope::Statement, self.query, prev.query),
        ];
        for (level, now, before) in levels {
            if level >= scope {
                break;
            }
            if now != before {
                return now > before;
            }
        }
        false
    }
}

impl fmt::Display for RunLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{}",
            self.stage, self.exec_group, self.client_group, self.client, self.trx, self.query
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one() -> RunLevel {
        RunLevel {
            stage: 1,
            exec_group: 1,
            client_group: 1,
            client: 1,
            trx: 1,
            query: 1,
        }
    }

    #[test]
    fn unchanged_is_never_greater() {
        let rl = one();
        assert!(!rl.greater_than(rl, Scope::Statement));
        assert!(!rl.greater_than(rl, Scope::Client));
    }

    #[test]
    fn client_change_is_visible_below_client_scope() {
        let prev = one();
        let mut rl = prev;
        rl.client += 1;
        assert!(rl.greater_than(prev, Scope::Statement));
        assert!(rl.greater_than(prev, Scope::Trx));
        assert!(rl.greater_than(prev, Scope::Iter));
        assert!(!rl.greater_than(prev, Scope::Client));
        assert!(!rl.greater_than(prev, Scope::Stage));
    }

    #[test]
    fn total_order_follows_fields() {
        let a = one();
        let mut b = one();
        b.exec_group = 2;
        b.client = 0;
        assert!(b > a);
        assert_eq!(a.client_id(), "1/1/1/1");
    }
}
