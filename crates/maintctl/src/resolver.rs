//! Topology resolver: host tokens to cluster nodes.
//!
//! A token made only of digits is a node id, anything else is an FQDN.
//! Resolution works against an explicit snapshot taken from
//! `list_cluster_nodes`, never against global state.

use maint_common::{ActionState, LockScope, MaintError, Node, NodeId};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One operator-supplied host token, classified by shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostToken {
    NodeId(NodeId),
    Fqdn(String),
}

impl HostToken {
    pub fn parse(token: &str) -> Result<Self, MaintError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(MaintError::UnknownHost(String::new()));
        }
        if token.bytes().all(|b| b.is_ascii_digit()) {
            return token
                .parse::<NodeId>()
                .map(HostToken::NodeId)
                .map_err(|_| MaintError::UnknownHost(token.to_string()));
        }
        Ok(HostToken::Fqdn(token.to_string()))
    }

    fn matches_scope(&self, scope: &LockScope) -> bool {
        match (self, scope) {
            (HostToken::NodeId(id), LockScope::Node(node)) => id == node,
            (HostToken::Fqdn(fqdn), LockScope::Host(host)) => fqdn.eq_ignore_ascii_case(host),
            _ => false,
        }
    }
}

/// Split a `--hosts=a,b,c` value into tokens
pub fn parse_host_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Cluster nodes as seen at the start of an invocation
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    by_id: BTreeMap<NodeId, Node>,
    by_fqdn: HashMap<String, NodeId>,
}

impl TopologySnapshot {
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut snapshot = Self::default();
        for node in nodes {
            snapshot
                .by_fqdn
                .insert(node.fqdn.to_ascii_lowercase(), node.id);
            snapshot.by_id.insert(node.id, node);
        }
        snapshot
    }

    pub fn by_id(&self, id: NodeId) -> Option<&Node> {
        self.by_id.get(&id)
    }

    pub fn by_fqdn(&self, fqdn: &str) -> Option<&Node> {
        self.by_fqdn
            .get(&fqdn.to_ascii_lowercase())
            .and_then(|id| self.by_id.get(id))
    }

    fn lookup(&self, token: &HostToken) -> Option<&Node> {
        match token {
            HostToken::NodeId(id) => self.by_id(*id),
            HostToken::Fqdn(fqdn) => self.by_fqdn(fqdn),
        }
    }
}

/// How the operator referred to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Host,
    NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    pub node: Node,
    pub addressed_by: AddressKind,
}

impl ResolvedNode {
    /// Lock scope in the same addressing the operator used
    pub fn lock_scope(&self) -> LockScope {
        match self.addressed_by {
            AddressKind::Host => LockScope::Host(self.node.fqdn.clone()),
            AddressKind::NodeId => LockScope::Node(self.node.id),
        }
    }
}

/// Resolve tokens in input order, dropping later duplicates of a node
pub fn resolve(
    tokens: &[String],
    snapshot: &TopologySnapshot,
) -> Result<Vec<ResolvedNode>, MaintError> {
    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(tokens.len());

    for raw in tokens {
        let token = HostToken::parse(raw)?;
        let node = snapshot
            .lookup(&token)
            .ok_or_else(|| MaintError::UnknownHost(raw.trim().to_string()))?;

        if !seen.insert(node.id) {
            continue;
        }

        let addressed_by = match token {
            HostToken::NodeId(_) => AddressKind::NodeId,
            HostToken::Fqdn(_) => AddressKind::Host,
        };
        resolved.push(ResolvedNode {
            node: node.clone(),
            addressed_by,
        });
    }

    Ok(resolved)
}

/// Pick the locks of an existing task that the tokens refer to.
///
/// Tokens are matched against lock scopes as the task was created, so
/// `complete` needs no topology snapshot.
pub fn match_locks<'a>(
    tokens: &[String],
    states: &'a [ActionState],
) -> Result<Vec<&'a ActionState>, MaintError> {
    let mut seen = HashSet::new();
    let mut matched = Vec::new();

    for raw in tokens {
        let token = HostToken::parse(raw)?;
        let mut found = false;
        for state in states.iter().filter(|s| token.matches_scope(&s.action.scope)) {
            found = true;
            if seen.insert(&state.action_uid) {
                matched.push(state);
            }
        }
        if !found {
            return Err(MaintError::UnknownHost(raw.trim().to_string()));
        }
    }

    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maint_common::{ActionReason, ActionStatus, ActionUid, LockAction};

    fn snapshot() -> TopologySnapshot {
        TopologySnapshot::new((1..=4).map(|id| Node {
            id,
            fqdn: format!("ydb-{}.ydb.tech", id),
        }))
    }

    fn tokens(raw: &str) -> Vec<String> {
        parse_host_list(raw)
    }

    #[test]
    fn test_parse_host_list() {
        assert_eq!(tokens(" a, b,,c ,"), vec!["a", "b", "c"]);
        assert!(tokens("").is_empty());
    }

    #[test]
    fn test_token_shape() {
        assert_eq!(HostToken::parse("17").unwrap(), HostToken::NodeId(17));
        assert_eq!(
            HostToken::parse("ydb-1.ydb.tech").unwrap(),
            HostToken::Fqdn("ydb-1.ydb.tech".into())
        );
        assert_eq!(
            HostToken::parse("1a").unwrap(),
            HostToken::Fqdn("1a".into())
        );
        assert!(HostToken::parse("99999999999").is_err());
    }

    #[test]
    fn test_resolve_fqdns_and_ids() {
        let snap = snapshot();
        let nodes = resolve(&tokens("ydb-2.ydb.tech,1"), &snap).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].node.id, 2);
        assert_eq!(nodes[0].lock_scope(), LockScope::Host("ydb-2.ydb.tech".into()));
        assert_eq!(nodes[1].node.fqdn, "ydb-1.ydb.tech");
        assert_eq!(nodes[1].lock_scope(), LockScope::Node(1));
    }

    #[test]
    fn test_resolve_dedupes_preserving_order() {
        let snap = snapshot();
        let nodes = resolve(&tokens("3,ydb-1.ydb.tech,ydb-3.ydb.tech,1,3"), &snap).unwrap();
        let ids: Vec<_> = nodes.iter().map(|n| n.node.id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(nodes[0].addressed_by, AddressKind::NodeId);
    }

    #[test]
    fn test_resolve_is_case_insensitive_on_fqdn() {
        let nodes = resolve(&tokens("YDB-4.ydb.tech"), &snapshot()).unwrap();
        assert_eq!(nodes[0].node.fqdn, "ydb-4.ydb.tech");
    }

    #[test]
    fn test_unknown_host() {
        let err = resolve(&tokens("ydb-1.ydb.tech,ydb-9.ydb.tech"), &snapshot()).unwrap_err();
        assert!(matches!(err, MaintError::UnknownHost(ref t) if t == "ydb-9.ydb.tech"));
        assert!(resolve(&tokens("42"), &snapshot()).is_err());
    }

    fn state(action_id: &str, scope: LockScope) -> ActionState {
        ActionState {
            action_uid: ActionUid {
                task_uid: "t".into(),
                group_id: format!("g-{}", action_id),
                action_id: action_id.into(),
            },
            action: LockAction {
                scope,
                duration_secs: 60,
            },
            status: ActionStatus::Performed,
            reason: ActionReason::Ok,
            deadline: None,
        }
    }

    #[test]
    fn test_match_locks_by_scope() {
        let states = vec![
            state("a1", LockScope::Host("ydb-1.ydb.tech".into())),
            state("a2", LockScope::Node(2)),
        ];
        let matched = match_locks(&tokens("2,ydb-1.ydb.tech,2"), &states).unwrap();
        let ids: Vec<_> = matched.iter().map(|s| s.action_uid.action_id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a1"]);

        // a host-scoped lock is not reachable by node id
        assert!(match_locks(&tokens("1"), &states).is_err());
    }
}
