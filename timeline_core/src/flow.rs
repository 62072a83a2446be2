//! Zone-to-zone movement graph over a frame window, and the greedy bundling
//! of near-parallel edges into clusters for display.

use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashMap;
use frame_schema::{FramePayload, ZoneKey};
use serde::Serialize;

use crate::config::FlowConfig;
use crate::projection::{PlaneProjection, PlanePoint};

/// Minimum direction cosine for two edges to share a cluster.
pub const CLUSTER_COS_MIN: f64 = 0.94;
/// Maximum midpoint separation, in plane units.
pub const CLUSTER_MID_MAX: f64 = 18.0;
/// Maximum length difference, in plane units.
pub const CLUSTER_LEN_MAX: f64 = 18.0;

/// A frame contributing to the flow window. `id` is the archive index or the
/// live sequence number.
#[derive(Debug, Clone)]
pub struct FlowWindowFrame {
    pub id: u64,
    pub payload: Arc<FramePayload>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowParams {
    pub min_weight: f64,
    /// Zero keeps every edge.
    pub max_edges: usize,
}

impl FlowParams {
    pub fn from_config(config: &FlowConfig) -> Self {
        Self {
            min_weight: config.min_weight(),
            max_edges: config.max_edges(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowEdge {
    pub from: ZoneKey,
    pub to: ZoneKey,
    pub weight: f64,
    pub frames: Vec<u64>,
    pub names: Vec<String>,
    pub a: PlanePoint,
    pub b: PlanePoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowCluster {
    pub members: Vec<FlowEdge>,
    pub a: PlanePoint,
    pub b: PlanePoint,
    pub total_weight: f64,
    pub frames: Vec<u64>,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowAggregate {
    pub clusters: Vec<FlowCluster>,
    pub edge_count: usize,
    pub frame_count: usize,
}

#[derive(Debug)]
struct EdgeAccumulator {
    from: ZoneKey,
    to: ZoneKey,
    weight: f64,
    frames: BTreeSet<u64>,
    names: BTreeSet<String>,
}

/// Builds, filters, projects and clusters the flow graph for `frames`.
pub fn aggregate_flow(
    frames: &[FlowWindowFrame],
    params: FlowParams,
    projection: &PlaneProjection,
) -> FlowAggregate {
    let accumulated = accumulate_edges(frames, projection.zone_size());

    let mut edges: Vec<FlowEdge> = accumulated
        .into_iter()
        .filter(|edge| edge.weight >= params.min_weight)
        .map(|edge| FlowEdge {
            a: projection.zone_center(edge.from),
            b: projection.zone_center(edge.to),
            from: edge.from,
            to: edge.to,
            weight: edge.weight,
            frames: edge.frames.into_iter().collect(),
            names: edge.names.into_iter().collect(),
        })
        .collect();
    // Stable: equal weights keep first-seen order.
    edges.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    if params.max_edges > 0 {
        edges.truncate(params.max_edges);
    }

    let edge_count = edges.len();
    FlowAggregate {
        clusters: cluster_edges(edges),
        edge_count,
        frame_count: frames.len(),
    }
}

fn accumulate_edges(frames: &[FlowWindowFrame], zone_size: f64) -> Vec<EdgeAccumulator> {
    let mut edges: Vec<EdgeAccumulator> = Vec::new();
    let mut lookup: AHashMap<(ZoneKey, ZoneKey), usize> = AHashMap::new();

    for frame in frames {
        for transition in &frame.payload.transitions {
            if !(transition.weight > 0.0) {
                continue;
            }
            let key = (transition.from, transition.to);
            let slot = *lookup.entry(key).or_insert_with(|| {
                edges.push(EdgeAccumulator {
                    from: transition.from,
                    to: transition.to,
                    weight: 0.0,
                    frames: BTreeSet::new(),
                    names: BTreeSet::new(),
                });
                edges.len() - 1
            });
            let edge = &mut edges[slot];
            edge.weight += transition.weight;
            edge.frames.insert(frame.id);
            edge.names.extend(transition.names.iter().cloned());
        }
    }

    // Players seen changing zone between consecutive frames name the edges
    // their move matches. They never create edges of their own.
    for pair in frames.windows(2) {
        let previous: AHashMap<&str, ZoneKey> = pair[0]
            .payload
            .players
            .iter()
            .filter_map(|player| Some((player.identity()?, player.zone_for(zone_size)?)))
            .collect();
        for player in &pair[1].payload.players {
            let (Some(identity), Some(zone)) = (player.identity(), player.zone_for(zone_size))
            else {
                continue;
            };
            let Some(&before) = previous.get(identity) else {
                continue;
            };
            if before == zone {
                continue;
            }
            if let Some(&slot) = lookup.get(&(before, zone)) {
                if let Some(name) = player.display_name() {
                    edges[slot].names.insert(name.to_owned());
                }
            }
        }
    }

    edges
}

struct EdgeGeometry {
    dir: (f64, f64),
    mid: PlanePoint,
    len: f64,
}

impl EdgeGeometry {
    fn of(a: PlanePoint, b: PlanePoint) -> Self {
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let raw = dx.hypot(dy);
        let len = if raw > 0.0 { raw } else { 1.0 };
        Self {
            dir: (dx / len, dy / len),
            mid: PlanePoint {
                x: (a.x + b.x) / 2.0,
                y: (a.y + b.y) / 2.0,
            },
            len,
        }
    }

    fn accepts(&self, other: &EdgeGeometry) -> bool {
        let cos = self.dir.0 * other.dir.0 + self.dir.1 * other.dir.1;
        cos >= CLUSTER_COS_MIN
            && self.mid.distance(&other.mid) <= CLUSTER_MID_MAX
            && (self.len - other.len).abs() <= CLUSTER_LEN_MAX
    }
}

struct ClusterBuilder {
    anchor: EdgeGeometry,
    members: Vec<FlowEdge>,
    sum_a: (f64, f64),
    sum_b: (f64, f64),
    total_weight: f64,
    frames: BTreeSet<u64>,
    names: BTreeSet<String>,
}

impl ClusterBuilder {
    fn start(edge: FlowEdge) -> Self {
        let mut builder = Self {
            anchor: EdgeGeometry::of(edge.a, edge.b),
            members: Vec::new(),
            sum_a: (0.0, 0.0),
            sum_b: (0.0, 0.0),
            total_weight: 0.0,
            frames: BTreeSet::new(),
            names: BTreeSet::new(),
        };
        builder.absorb(edge);
        builder
    }

    fn absorb(&mut self, edge: FlowEdge) {
        let w = edge.weight;
        self.sum_a.0 += edge.a.x * w;
        self.sum_a.1 += edge.a.y * w;
        self.sum_b.0 += edge.b.x * w;
        self.sum_b.1 += edge.b.y * w;
        self.total_weight += w;
        self.frames.extend(edge.frames.iter().copied());
        self.names.extend(edge.names.iter().cloned());
        self.members.push(edge);
    }

    fn finish(self) -> FlowCluster {
        let divisor = if self.total_weight > 0.0 {
            self.total_weight
        } else {
            1.0
        };
        FlowCluster {
            a: PlanePoint {
                x: self.sum_a.0 / divisor,
                y: self.sum_a.1 / divisor,
            },
            b: PlanePoint {
                x: self.sum_b.0 / divisor,
                y: self.sum_b.1 / divisor,
            },
            total_weight: self.total_weight,
            frames: self.frames.into_iter().collect(),
            names: self.names.into_iter().collect(),
            members: self.members,
        }
    }
}

/// Greedy single pass over `edges` in the given order. Each edge joins the
/// first cluster whose founding edge is close enough in direction, midpoint
/// and length; the founding edge's geometry never changes while the pass
/// runs.
pub fn cluster_edges(edges: Vec<FlowEdge>) -> Vec<FlowCluster> {
    let mut clusters: Vec<ClusterBuilder> = Vec::new();
    for edge in edges {
        let geometry = EdgeGeometry::of(edge.a, edge.b);
        match clusters
            .iter_mut()
            .find(|cluster| cluster.anchor.accepts(&geometry))
        {
            Some(cluster) => cluster.absorb(edge),
            None => clusters.push(ClusterBuilder::start(edge)),
        }
    }
    clusters.into_iter().map(ClusterBuilder::finish).collect()
}
