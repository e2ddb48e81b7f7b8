//! Dimension → Area → Cluster → Macro.
//!
//! The group structure comes from the scored results' group keys: every
//! dimension, area and cluster that appears there is an expected child of the
//! level above, even if its own aggregation was skipped. Dimension groups are
//! (area, dimension) cells keyed `area/dimension`, so the same dimension id
//! can appear under every area.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::aggregation::error::GroupFailure;
use crate::aggregation::level::{aggregate_level, ChildScore, GroupInput, LevelOutcome, LevelPolicy};
use crate::aggregation::macro_level::{aggregate_macro, MacroOutcome};
use crate::config::tunables::PipelineTunables;
use crate::domain::score::{Level, ScoredResult};

/// Parent/child relations between group ids, derived from scored results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lineage {
    pub dimensions_by_area: BTreeMap<String, BTreeSet<String>>,
    pub clusters_by_area: BTreeMap<String, BTreeSet<String>>,
    pub areas_by_cluster: BTreeMap<String, BTreeSet<String>>,
    pub clusters: BTreeSet<String>,
}

impl Lineage {
    pub fn from_scored(scored: &[ScoredResult]) -> Self {
        let mut lineage = Self::default();
        for r in scored {
            let g = &r.groups;
            lineage
                .dimensions_by_area
                .entry(g.area.clone())
                .or_default()
                .insert(g.dimension_group());
            lineage
                .clusters_by_area
                .entry(g.area.clone())
                .or_default()
                .insert(g.cluster.clone());
            lineage
                .areas_by_cluster
                .entry(g.cluster.clone())
                .or_default()
                .insert(g.area.clone());
            lineage.clusters.insert(g.cluster.clone());
        }
        lineage
    }
}

fn child_from(outcome: &LevelOutcome, id: &str, parent: Option<&str>) -> ChildScore {
    let score = outcome
        .get(id)
        .filter(|s| parent.is_none() || s.parent_id.as_deref() == parent)
        .map(|s| s.score);
    ChildScore::new(id, score)
}

pub fn aggregate_dimensions(scored: &[ScoredResult], tunables: &PipelineTunables) -> LevelOutcome {
    let mut groups: BTreeMap<String, GroupInput> = BTreeMap::new();
    for r in scored {
        let group = groups.entry(r.groups.dimension_group()).or_default();
        group.children.push(ChildScore::new(&r.task_id, r.score));
        group.parents.insert(r.groups.area.clone());
    }
    let policy = LevelPolicy {
        level: Level::Dimension,
        min_coverage: tunables.coverage.dimension,
        weights: &tunables.weights.dimension,
        expected: &tunables.expected.dimension,
        tolerance: tunables.weight_tolerance,
        quality: &tunables.quality,
    };
    aggregate_level(&policy, groups)
}

pub fn aggregate_areas(
    scored: &[ScoredResult],
    dimensions: &LevelOutcome,
    tunables: &PipelineTunables,
) -> LevelOutcome {
    let lineage = Lineage::from_scored(scored);
    let groups = lineage
        .dimensions_by_area
        .iter()
        .map(|(area, dims)| {
            let input = GroupInput {
                children: dims
                    .iter()
                    .map(|d| child_from(dimensions, d, Some(area)))
                    .collect(),
                parents: lineage.clusters_by_area.get(area).cloned().unwrap_or_default(),
            };
            (area.clone(), input)
        })
        .collect();
    let policy = LevelPolicy {
        level: Level::Area,
        min_coverage: tunables.coverage.area,
        weights: &tunables.weights.area,
        expected: &tunables.expected.area,
        tolerance: tunables.weight_tolerance,
        quality: &tunables.quality,
    };
    aggregate_level(&policy, groups)
}

pub fn aggregate_clusters(
    scored: &[ScoredResult],
    areas: &LevelOutcome,
    tunables: &PipelineTunables,
) -> LevelOutcome {
    let lineage = Lineage::from_scored(scored);
    let groups = lineage
        .areas_by_cluster
        .iter()
        .map(|(cluster, members)| {
            let input = GroupInput {
                children: members
                    .iter()
                    .map(|a| child_from(areas, a, Some(cluster)))
                    .collect(),
                parents: BTreeSet::new(),
            };
            (cluster.clone(), input)
        })
        .collect();
    let policy = LevelPolicy {
        level: Level::Cluster,
        min_coverage: tunables.coverage.cluster,
        weights: &tunables.weights.cluster,
        expected: &tunables.expected.cluster,
        tolerance: tunables.weight_tolerance,
        quality: &tunables.quality,
    };
    aggregate_level(&policy, groups)
}

pub fn aggregate_macro_level(
    scored: &[ScoredResult],
    clusters: &LevelOutcome,
    tunables: &PipelineTunables,
) -> MacroOutcome {
    let lineage = Lineage::from_scored(scored);
    let children: Vec<ChildScore> = lineage
        .clusters
        .iter()
        .map(|c| child_from(clusters, c, None))
        .collect();
    aggregate_macro(
        &children,
        &tunables.weights.macro_level,
        tunables.expected.macro_level,
        tunables.coverage.macro_level,
        tunables.weight_tolerance,
        tunables.gap_margin,
        &tunables.quality,
    )
}

/// All four levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyReport {
    pub dimensions: LevelOutcome,
    pub areas: LevelOutcome,
    pub clusters: LevelOutcome,
    pub macro_level: MacroOutcome,
}

impl HierarchyReport {
    /// Every skipped group, bottom level first.
    pub fn failures(&self) -> Vec<GroupFailure> {
        self.dimensions
            .failures
            .iter()
            .chain(&self.areas.failures)
            .chain(&self.clusters.failures)
            .chain(&self.macro_level.failures)
            .cloned()
            .collect()
    }
}

/// Run the four levels in order over `scored`.
pub fn aggregate_hierarchy(scored: &[ScoredResult], tunables: &PipelineTunables) -> HierarchyReport {
    let dimensions = aggregate_dimensions(scored, tunables);
    let areas = aggregate_areas(scored, &dimensions, tunables);
    let clusters = aggregate_clusters(scored, &areas, tunables);
    let macro_level = aggregate_macro_level(scored, &clusters, tunables);
    HierarchyReport {
        dimensions,
        areas,
        clusters,
        macro_level,
    }
}
