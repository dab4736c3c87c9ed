//! Ticket dependency graph and tier layering.
//!
//! Tickets are stored in an arena owned by the graph; edges and tiers refer
//! to them by [`TicketId`]. An edge `A → B` means "B depends on A".
//!
//! Tier assignment is longest-path layering computed with Kahn's algorithm:
//! a ticket's tier is 0 without dependencies, otherwise one more than the
//! highest tier among its dependencies. Tickets sharing a tier never depend
//! on each other and may run in parallel.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::ticket::{compare_identifiers, Ticket};

/// Index of a ticket in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TicketId(pub usize);

/// Resolved dependency graph, not yet layered.
#[derive(Debug, Clone)]
pub struct TicketGraph {
    tickets: Vec<Ticket>,
    /// `dependent → dependencies` (upstream adjacency).
    upstream: Vec<Vec<TicketId>>,
    /// `dependency → dependents` (downstream adjacency).
    downstream: Vec<Vec<TicketId>>,
}

impl TicketGraph {
    /// Resolve every dependency reference against the ticket set.
    ///
    /// A reference matches a ticket identifier first, then an exact title.
    pub fn build(tickets: Vec<Ticket>) -> OrchestratorResult<Self> {
        let mut by_identifier: HashMap<&str, TicketId> = HashMap::new();
        let mut by_title: HashMap<&str, Vec<TicketId>> = HashMap::new();
        for (i, t) in tickets.iter().enumerate() {
            if by_identifier.insert(t.identifier.as_str(), TicketId(i)).is_some() {
                return Err(OrchestratorError::DuplicateTicket {
                    identifier: t.identifier.clone(),
                });
            }
            by_title.entry(t.title.as_str()).or_default().push(TicketId(i));
        }

        let mut upstream: Vec<Vec<TicketId>> = vec![Vec::new(); tickets.len()];
        let mut downstream: Vec<Vec<TicketId>> = vec![Vec::new(); tickets.len()];

        for (i, t) in tickets.iter().enumerate() {
            for reference in &t.depends_on {
                let reference = reference.as_str();
                let dep = match by_identifier.get(reference) {
                    Some(id) => *id,
                    None => match by_title.get(reference).map(Vec::as_slice) {
                        Some([only]) => *only,
                        Some(many) if !many.is_empty() => {
                            return Err(OrchestratorError::AmbiguousDependency {
                                ticket: t.identifier.clone(),
                                reference: reference.to_string(),
                                candidates: many
                                    .iter()
                                    .map(|id| tickets[id.0].identifier.clone())
                                    .collect(),
                            })
                        }
                        _ => {
                            return Err(OrchestratorError::UnresolvedDependency {
                                ticket: t.identifier.clone(),
                                reference: reference.to_string(),
                            })
                        }
                    },
                };
                if !upstream[i].contains(&dep) {
                    upstream[i].push(dep);
                    downstream[dep.0].push(TicketId(i));
                }
            }
        }

        Ok(Self {
            tickets,
            upstream,
            downstream,
        })
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Layer the graph into tiers.
    ///
    /// Fails with [`OrchestratorError::DependencyCycle`] when Kahn's algorithm
    /// stalls; no tier is assigned to any ticket in that case.
    pub fn plan(self) -> OrchestratorResult<TierPlan> {
        let n = self.tickets.len();
        let mut in_degree: Vec<usize> = self.upstream.iter().map(Vec::len).collect();
        let mut tier = vec![0usize; n];
        let mut queue: VecDeque<TicketId> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(TicketId)
            .collect();
        let mut processed = 0usize;

        while let Some(id) = queue.pop_front() {
            processed += 1;
            for &dependent in &self.downstream[id.0] {
                tier[dependent.0] = tier[dependent.0].max(tier[id.0] + 1);
                in_degree[dependent.0] -= 1;
                if in_degree[dependent.0] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if processed < n {
            return Err(OrchestratorError::DependencyCycle {
                tickets: self.find_cycle(&in_degree),
            });
        }

        let tier_count = tier.iter().max().map(|m| m + 1).unwrap_or(0);
        let mut tiers: Vec<Vec<TicketId>> = vec![Vec::new(); tier_count];
        for (i, t) in tier.iter().enumerate() {
            tiers[*t].push(TicketId(i));
        }
        for members in &mut tiers {
            members.sort_by(|a, b| {
                compare_identifiers(&self.tickets[a.0].identifier, &self.tickets[b.0].identifier)
            });
        }

        let tickets = self
            .tickets
            .into_iter()
            .zip(self.upstream)
            .zip(tier)
            .map(|((ticket, dependencies), tier)| PlannedTicket {
                ticket,
                tier,
                dependencies,
            })
            .collect();

        Ok(TierPlan { tickets, tiers })
    }

    /// Identifiers of one cycle among the tickets Kahn could not release.
    ///
    /// Every unreleased ticket has an unreleased dependency, so walking
    /// upstream through unreleased tickets must revisit a node.
    fn find_cycle(&self, in_degree: &[usize]) -> Vec<String> {
        let stuck = |id: TicketId| in_degree[id.0] > 0;
        let Some(start) = (0..self.tickets.len()).map(TicketId).find(|&id| stuck(id)) else {
            return Vec::new();
        };

        let mut path: Vec<TicketId> = Vec::new();
        let mut seen_at: HashMap<TicketId, usize> = HashMap::new();
        let mut current = start;
        loop {
            if let Some(&pos) = seen_at.get(&current) {
                let mut names: Vec<String> = path[pos..]
                    .iter()
                    .map(|id| self.tickets[id.0].identifier.clone())
                    .collect();
                names.sort_by(|a, b| compare_identifiers(a, b));
                return names;
            }
            seen_at.insert(current, path.len());
            path.push(current);
            match self.upstream[current.0].iter().copied().find(|&d| stuck(d)) {
                Some(next) => current = next,
                None => {
                    return vec![self.tickets[current.0].identifier.clone()];
                }
            }
        }
    }
}

/// A ticket with its computed tier and resolved dependencies.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedTicket {
    pub ticket: Ticket,
    pub tier: usize,
    pub dependencies: Vec<TicketId>,
}

/// Immutable tier assignment for one planning run.
#[derive(Debug, Clone, Serialize)]
pub struct TierPlan {
    tickets: Vec<PlannedTicket>,
    /// Members of each tier, identifier ascending.
    tiers: Vec<Vec<TicketId>>,
}

/// Layer `tickets` into tiers in one step.
pub fn plan_tiers(tickets: Vec<Ticket>) -> OrchestratorResult<TierPlan> {
    TicketGraph::build(tickets)?.plan()
}

impl TierPlan {
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Members of `tier` in deterministic identifier order.
    pub fn tier(&self, tier: usize) -> &[TicketId] {
        self.tiers.get(tier).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn ticket(&self, id: TicketId) -> &PlannedTicket {
        &self.tickets[id.0]
    }

    pub fn tickets(&self) -> impl Iterator<Item = (TicketId, &PlannedTicket)> {
        self.tickets.iter().enumerate().map(|(i, t)| (TicketId(i), t))
    }

    pub fn find(&self, identifier: &str) -> Option<TicketId> {
        self.tickets
            .iter()
            .position(|t| t.ticket.identifier == identifier)
            .map(TicketId)
    }

    /// Tier of the ticket with `identifier`, if present.
    pub fn tier_of(&self, identifier: &str) -> Option<usize> {
        self.find(identifier).map(|id| self.tickets[id.0].tier)
    }

    /// SHA-256 over the canonical ticket set (identifiers, titles, resolved
    /// dependency identifiers), independent of input order.
    pub fn digest(&self) -> String {
        #[derive(Serialize)]
        struct Canonical<'a> {
            identifier: &'a str,
            title: &'a str,
            depends_on: Vec<&'a str>,
        }

        let mut rows: Vec<Canonical<'_>> = self
            .tickets
            .iter()
            .map(|t| {
                let mut depends_on: Vec<&str> = t
                    .dependencies
                    .iter()
                    .map(|d| self.tickets[d.0].ticket.identifier.as_str())
                    .collect();
                depends_on.sort_by(|a, b| compare_identifiers(a, b));
                Canonical {
                    identifier: &t.ticket.identifier,
                    title: &t.ticket.title,
                    depends_on,
                }
            })
            .collect();
        rows.sort_by(|a, b| compare_identifiers(a.identifier, b.identifier));

        let bytes = serde_json::to_vec(&rows).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}
