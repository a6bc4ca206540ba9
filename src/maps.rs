//! Quest maps: the transitive reverse-prerequisite closure of a seed entity,
//! serialised as a node/edge graph for a front-end renderer.
//!
//! The walk is a deterministic DFS (tables and reliant lists are ordered), so
//! regenerating an unchanged graph produces byte-identical JSON. A node with
//! `map_transition` set ends the walk and becomes a link to a map seeded there.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::domain::{EntityKind, EntityRef, MapId, UserId};
use crate::error::{EngineError, Result};
use crate::notify::{Notification, Target, Verb};
use crate::prereq;
use crate::store::DeckData;
use crate::util::truncate_label;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoutParams {
    pub name: String,
    pub directed: bool,
    pub node_sep: u32,
    pub rank_sep: u32,
    pub edge_routing: String,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            name: "dagre".into(),
            directed: true,
            node_sep: 25,
            rank_sep: 10,
            edge_routing: "bezier".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: String,
    pub label: String,
    pub content_kind: EntityKind,
    pub object_id: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub href: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapNode {
    pub data: NodeData,
    pub classes: String,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeData {
    pub id: String,
    pub source: String,
    pub target: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapEdge {
    pub data: EdgeData,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapGraph {
    pub nodes: Vec<MapNode>,
    pub edges: Vec<MapEdge>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestMap {
    pub id: MapId,
    pub name: String,
    pub seed: EntityRef,
    pub parent_map: Option<MapId>,
    pub is_primary: bool,
    pub layout: LayoutParams,
    /// Serialised `MapGraph`, empty until first generated.
    pub graph_json: String,
    pub last_regeneration: Option<DateTime<Utc>>,
}

impl QuestMap {
    pub fn graph(&self) -> Result<MapGraph> {
        if self.graph_json.is_empty() {
            return Ok(MapGraph::default());
        }
        serde_json::from_str(&self.graph_json)
            .map_err(|e| EngineError::InvalidInput(format!("map {} holds unreadable graph: {e}", self.id)))
    }
}

fn node_id(e: EntityRef) -> String {
    format!("{}-{}", e.kind.label().to_lowercase(), e.id)
}

fn href_for(seed: EntityRef) -> String {
    format!("map://{}/{}", seed.kind.label().to_lowercase(), seed.id)
}

fn is_transition(deck: &DeckData, e: EntityRef) -> bool {
    match e.kind {
        EntityKind::Quest => deck.quests.get(&e.id).is_some_and(|q| q.map_transition),
        EntityKind::Badge => deck.badges.get(&e.id).is_some_and(|b| b.map_transition),
        _ => false,
    }
}

fn is_repeatable(deck: &DeckData, e: EntityRef) -> bool {
    e.kind == EntityKind::Quest && deck.quests.get(&e.id).is_some_and(|q| q.is_repeatable())
}

/// `"Quest: name (xp)"`, `"Badge: name (xp)"`, or just the name.
pub fn node_label(deck: &DeckData, e: EntityRef, max_len: usize) -> String {
    let (name, xp) = match e.kind {
        EntityKind::Quest => match deck.quests.get(&e.id) {
            Some(q) => (q.name.clone(), Some(q.xp)),
            None => return String::new(),
        },
        EntityKind::Badge => match deck.badges.get(&e.id) {
            Some(b) => (b.name.clone(), Some(b.xp)),
            None => return String::new(),
        },
        _ => (
            prereq::capability(e.kind)
                .and_then(|c| c.display_name(deck, e.id))
                .unwrap_or_default(),
            None,
        ),
    };
    match xp {
        Some(xp) => truncate_label(&format!("{}: ", e.kind), &name, &format!(" ({xp})"), max_len),
        None => truncate_label("", &name, "", max_len),
    }
}

struct Walk<'a> {
    deck: &'a DeckData,
    now: NaiveDateTime,
    label_len: usize,
    seed: EntityRef,
    visited: BTreeSet<EntityRef>,
    campaigns: BTreeSet<u64>,
    edges: BTreeSet<(String, String)>,
    graph: MapGraph,
    transitions: Vec<EntityRef>,
}

impl Walk<'_> {
    fn add_node(&mut self, e: EntityRef) {
        let mut classes = vec![e.kind.label().to_lowercase()];
        let mut href = None;
        if e != self.seed && is_transition(self.deck, e) {
            classes.push("link".into());
            href = Some(href_for(e));
            self.transitions.push(e);
        }
        let parent = match e.kind {
            EntityKind::Quest => self.deck.quests.get(&e.id).and_then(|q| q.campaign_id),
            _ => None,
        }
        .filter(|c| self.deck.campaigns.contains_key(c));
        if let Some(c) = parent {
            if self.campaigns.insert(c) {
                let ce = EntityRef::campaign(c);
                self.graph.nodes.push(MapNode {
                    data: NodeData {
                        id: node_id(ce),
                        label: node_label(self.deck, ce, self.label_len),
                        content_kind: EntityKind::Campaign,
                        object_id: c,
                        parent: None,
                        href: None,
                    },
                    classes: "campaign".into(),
                });
            }
        }
        self.graph.nodes.push(MapNode {
            data: NodeData {
                id: node_id(e),
                label: node_label(self.deck, e, self.label_len),
                content_kind: e.kind,
                object_id: e.id,
                parent: parent.map(|c| node_id(EntityRef::campaign(c))),
                href,
            },
            classes: classes.join(" "),
        });
        if is_repeatable(self.deck, e) {
            self.add_edge(e, e);
        }
    }

    fn add_edge(&mut self, from: EntityRef, to: EntityRef) {
        let (source, target) = (node_id(from), node_id(to));
        if self.edges.insert((source.clone(), target.clone())) {
            self.graph.edges.push(MapEdge {
                data: EdgeData { id: format!("{source}->{target}"), source, target },
            });
        }
    }

    fn visit(&mut self, e: EntityRef) {
        if e != self.seed && is_transition(self.deck, e) {
            return;
        }
        for reliant in prereq::reliant_objects(self.deck, e, true, self.now) {
            self.add_edge(e, reliant);
            if self.visited.insert(reliant) {
                self.add_node(reliant);
                self.visit(reliant);
            }
        }
    }
}

/// Walk from `seed` and return the graph plus the transition nodes reached.
pub fn build_graph(deck: &DeckData, seed: EntityRef, now: DateTime<Utc>, label_len: usize) -> (MapGraph, Vec<EntityRef>) {
    let mut walk = Walk {
        deck,
        now: deck.local_now(now),
        label_len,
        seed,
        visited: BTreeSet::from([seed]),
        campaigns: BTreeSet::new(),
        edges: BTreeSet::new(),
        graph: MapGraph::default(),
        transitions: Vec::new(),
    };
    if seed.kind == EntityKind::Campaign {
        walk.campaigns.insert(seed.id);
    }
    walk.add_node(seed);
    walk.visit(seed);
    (walk.graph, walk.transitions)
}

pub fn map_for_seed(deck: &DeckData, seed: EntityRef) -> Option<MapId> {
    deck.maps.values().find(|m| m.seed == seed).map(|m| m.id)
}

pub fn primary_map(deck: &DeckData) -> Option<MapId> {
    deck.maps.values().find(|m| m.is_primary).map(|m| m.id)
}

/// Create an empty map. The first map of a deck becomes primary.
#[instrument(level = "info", skip(deck, name), fields(%seed))]
pub fn create_map(deck: &mut DeckData, name: impl Into<String>, seed: EntityRef, parent_map: Option<MapId>) -> Result<MapId> {
    if !deck.entity_exists(seed) {
        return Err(EngineError::not_found(format!("Seed {seed}")));
    }
    let id = deck.allocate_id();
    let is_primary = deck.maps.is_empty();
    deck.maps.insert(
        id,
        QuestMap {
            id,
            name: name.into(),
            seed,
            parent_map,
            is_primary,
            layout: LayoutParams::default(),
            graph_json: String::new(),
            last_regeneration: None,
        },
    );
    info!(target: "maps", map_id = id, %seed, is_primary, "Map created");
    Ok(id)
}

/// Rebuild one map. Child maps for transition nodes are created as needed
/// and returned so the caller can regenerate them too. A map whose seed is
/// gone is deleted and the requester told.
#[instrument(level = "info", skip(deck, now, label_len), fields(map_id = id))]
pub fn regenerate(
    deck: &mut DeckData,
    id: MapId,
    requester: Option<UserId>,
    now: DateTime<Utc>,
    label_len: usize,
) -> Result<Vec<MapId>> {
    let map = deck.map(id)?.clone();
    if !deck.entity_exists(map.seed) {
        delete_map(deck, id)?;
        warn!(target: "maps", map_id = id, seed = %map.seed, "Map seed missing; map deleted");
        if let Some(user) = requester {
            let actor = deck.settings.deck_ai;
            deck.notify(Notification::new(actor, Verb::Removed, Target::Map(id), vec![user], now));
        }
        return Err(EngineError::MissingSeed { map_id: id, seed: map.seed });
    }

    let (graph, transitions) = build_graph(deck, map.seed, now, label_len);
    let json = serde_json::to_string(&graph)
        .map_err(|e| EngineError::InvalidInput(format!("map {id} could not be serialised: {e}")))?;
    let mut children = Vec::new();
    for t in transitions {
        if map_for_seed(deck, t).is_none() {
            let name = node_label(deck, t, usize::MAX);
            children.push(create_map(deck, name, t, Some(id))?);
        }
    }
    if let Some(m) = deck.maps.get_mut(&id) {
        m.graph_json = json;
        m.last_regeneration = Some(now);
    }
    info!(
        target: "maps",
        map_id = id,
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        children = children.len(),
        "Map regenerated"
    );
    Ok(children)
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct RegenerateReport {
    pub regenerated: Vec<MapId>,
    pub deleted: Vec<MapId>,
}

/// Regenerate every map (and any child maps that appear on the way). Per-map
/// failures are recorded and the rest carry on.
#[instrument(level = "info", skip(deck, now, label_len))]
pub fn regenerate_all(deck: &mut DeckData, requester: Option<UserId>, now: DateTime<Utc>, label_len: usize) -> RegenerateReport {
    let mut report = RegenerateReport::default();
    let mut queue: VecDeque<MapId> = deck.maps.keys().copied().collect();
    let mut done = BTreeSet::new();
    while let Some(id) = queue.pop_front() {
        if !done.insert(id) {
            continue;
        }
        match regenerate(deck, id, requester, now, label_len) {
            Ok(children) => {
                report.regenerated.push(id);
                queue.extend(children);
            }
            Err(EngineError::MissingSeed { .. }) => report.deleted.push(id),
            Err(e) => warn!(target: "maps", map_id = id, error = %e, "Map regeneration failed; continuing"),
        }
    }
    report
}

/// Make `id` the only primary map.
pub fn set_primary(deck: &mut DeckData, id: MapId) -> Result<()> {
    deck.map(id)?;
    for m in deck.maps.values_mut() {
        m.is_primary = m.id == id;
    }
    info!(target: "maps", map_id = id, "Primary map set");
    Ok(())
}

/// Remove a map. Its child maps are detached, and if it was primary the
/// lowest remaining id takes over.
pub fn delete_map(deck: &mut DeckData, id: MapId) -> Result<QuestMap> {
    let removed = deck.maps.remove(&id).ok_or_else(|| EngineError::not_found(format!("Map {id}")))?;
    for m in deck.maps.values_mut().filter(|m| m.parent_map == Some(id)) {
        m.parent_map = None;
    }
    if removed.is_primary {
        if let Some(next) = deck.maps.keys().next().copied() {
            set_primary(deck, next)?;
        }
    }
    info!(target: "maps", map_id = id, "Map deleted");
    Ok(removed)
}
