//! Record validation
//!
//! Checks every candidate record before anything is written. Invalid records
//! are excluded and reported; a run whose invalid fraction exceeds the abort
//! threshold does not proceed at all.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::record::{ChildRecord, Coordinate, ParentRecord, RecordKind};

/// Sanity region every boundary point must fall inside
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingRegion {
    pub fn contains(&self, point: &Coordinate) -> bool {
        point.lon >= self.min_lon
            && point.lon <= self.max_lon
            && point.lat >= self.min_lat
            && point.lat <= self.max_lat
    }
}

impl Default for BoundingRegion {
    fn default() -> Self {
        Self {
            min_lon: -180.0,
            max_lon: 180.0,
            min_lat: -90.0,
            max_lat: 90.0,
        }
    }
}

/// Why a record was rejected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// Fewer than 3 distinct boundary points
    DegenerateBoundary { distinct_points: usize },
    /// Two non-adjacent edges of the ring cross
    SelfIntersectingBoundary,
    /// NaN or infinite coordinate
    NonFiniteCoordinate { index: usize },
    OutOfRegion { index: usize, lon: f64, lat: f64 },
    AreaOutOfRange { area: f64, max_area: f64 },
    EmptyKey,
    DuplicateKey { key: String },
    EmptyContent,
    /// The referenced parcel is missing or failed validation
    UnresolvedParent { parent_key: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DegenerateBoundary { distinct_points } => write!(
                f,
                "degenerate boundary: {} distinct points (need at least 3)",
                distinct_points
            ),
            Self::SelfIntersectingBoundary => write!(f, "boundary ring self-intersects"),
            Self::NonFiniteCoordinate { index } => {
                write!(f, "boundary point {} is not a finite coordinate", index)
            }
            Self::OutOfRegion { index, lon, lat } => write!(
                f,
                "boundary point {} ({}, {}) lies outside the bounding region",
                index, lon, lat
            ),
            Self::AreaOutOfRange { area, max_area } => {
                write!(f, "area {} outside [0, {}]", area, max_area)
            }
            Self::EmptyKey => write!(f, "record key is empty"),
            Self::DuplicateKey { key } => write!(f, "duplicate key {}", key),
            Self::EmptyContent => write!(f, "note content is empty"),
            Self::UnresolvedParent { parent_key } => write!(
                f,
                "referential integrity: parent {} does not exist in the validated parent set",
                parent_key
            ),
        }
    }
}

/// One rejected record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidRecord {
    /// Position in the source listing for its kind
    pub record_index: usize,
    pub record_kind: RecordKind,
    pub key: String,
    pub reasons: Vec<ValidationIssue>,
}

/// Counts for one record kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub parents: KindCounts,
    pub children: KindCounts,
    /// Ordered by kind (parents first), then record index
    pub invalid_records: Vec<InvalidRecord>,
}

impl ValidationReport {
    pub fn valid_parents(&self) -> usize {
        self.parents.valid
    }

    pub fn valid_children(&self) -> usize {
        self.children.valid
    }

    pub fn total(&self) -> usize {
        self.parents.total + self.children.total
    }

    pub fn invalid(&self) -> usize {
        self.parents.invalid + self.children.invalid
    }

    /// Invalid records over all records, 0 for an empty dataset
    pub fn invalid_fraction(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.invalid() as f64 / self.total() as f64
        }
    }

    pub fn exceeds(&self, threshold: f64) -> bool {
        self.invalid_fraction() > threshold
    }

    pub fn invalid_for(&self, kind: RecordKind) -> impl Iterator<Item = &InvalidRecord> {
        self.invalid_records
            .iter()
            .filter(move |r| r.record_kind == kind)
    }
}

/// Validated input plus the report explaining what was dropped
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// Parents with closed rings, in source order
    pub parents: Vec<ParentRecord>,
    pub children: Vec<ChildRecord>,
    pub report: ValidationReport,
}

/// Domain rules for parcels and notes
#[derive(Debug, Clone)]
pub struct Validator {
    region: BoundingRegion,
    max_area: f64,
}

impl Validator {
    pub fn new(region: BoundingRegion, max_area: f64) -> Self {
        Self { region, max_area }
    }

    /// Validate both kinds; children resolve only against parents that passed
    pub fn validate(&self, parents: &[ParentRecord], children: &[ChildRecord]) -> ValidationOutcome {
        let mut report = ValidationReport::default();
        let mut valid_parents = Vec::with_capacity(parents.len());
        let mut seen = HashSet::new();

        for (index, parent) in parents.iter().enumerate() {
            let closed = parent.with_closed_ring();
            let mut reasons = self.check_parent(&closed);
            if !parent.key.is_empty() && !seen.insert(parent.key.as_str()) {
                reasons.push(ValidationIssue::DuplicateKey {
                    key: parent.key.clone(),
                });
            }

            if reasons.is_empty() {
                valid_parents.push(closed);
            } else {
                report.invalid_records.push(InvalidRecord {
                    record_index: index,
                    record_kind: RecordKind::Parent,
                    key: parent.key.clone(),
                    reasons,
                });
            }
        }

        let resolvable: HashSet<&str> = valid_parents.iter().map(|p| p.key.as_str()).collect();
        let mut valid_children = Vec::with_capacity(children.len());
        let mut seen_children = HashSet::new();

        for (index, child) in children.iter().enumerate() {
            let mut reasons = Vec::new();
            if child.key.trim().is_empty() {
                reasons.push(ValidationIssue::EmptyKey);
            } else if !seen_children.insert(child.key.as_str()) {
                reasons.push(ValidationIssue::DuplicateKey {
                    key: child.key.clone(),
                });
            }
            if child.content.trim().is_empty() {
                reasons.push(ValidationIssue::EmptyContent);
            }
            if !resolvable.contains(child.parent_key.as_str()) {
                reasons.push(ValidationIssue::UnresolvedParent {
                    parent_key: child.parent_key.clone(),
                });
            }

            if reasons.is_empty() {
                valid_children.push(child.clone());
            } else {
                report.invalid_records.push(InvalidRecord {
                    record_index: index,
                    record_kind: RecordKind::Child,
                    key: child.key.clone(),
                    reasons,
                });
            }
        }

        report.parents = KindCounts {
            total: parents.len(),
            valid: valid_parents.len(),
            invalid: parents.len() - valid_parents.len(),
        };
        report.children = KindCounts {
            total: children.len(),
            valid: valid_children.len(),
            invalid: children.len() - valid_children.len(),
        };

        ValidationOutcome {
            parents: valid_parents,
            children: valid_children,
            report,
        }
    }

    /// Rules for a single parcel whose ring has already been closed
    pub fn check_parent(&self, parent: &ParentRecord) -> Vec<ValidationIssue> {
        let mut reasons = Vec::new();

        if parent.key.trim().is_empty() {
            reasons.push(ValidationIssue::EmptyKey);
        }

        let non_finite = parent.boundary.iter().position(|p| !p.is_finite());
        if let Some(index) = non_finite {
            reasons.push(ValidationIssue::NonFiniteCoordinate { index });
        } else {
            let distinct = distinct_points(&parent.boundary);
            if distinct < 3 {
                reasons.push(ValidationIssue::DegenerateBoundary {
                    distinct_points: distinct,
                });
            } else if ring_self_intersects(&parent.boundary) {
                reasons.push(ValidationIssue::SelfIntersectingBoundary);
            }

            if let Some((index, point)) = parent
                .boundary
                .iter()
                .enumerate()
                .find(|(_, p)| !self.region.contains(p))
            {
                reasons.push(ValidationIssue::OutOfRegion {
                    index,
                    lon: point.lon,
                    lat: point.lat,
                });
            }
        }

        if let Some(area) = parent.attributes.area {
            if !(0.0..=self.max_area).contains(&area) {
                reasons.push(ValidationIssue::AreaOutOfRange {
                    area,
                    max_area: self.max_area,
                });
            }
        }

        reasons
    }
}

fn distinct_points(points: &[Coordinate]) -> usize {
    let mut distinct: Vec<Coordinate> = Vec::new();
    for p in points {
        if !distinct.contains(p) {
            distinct.push(*p);
        }
    }
    distinct.len()
}

/// Whether any two non-adjacent edges of a closed ring intersect
///
/// Repeated consecutive vertices are collapsed first; a zero-length edge
/// would otherwise make two edges sharing a vertex look non-adjacent.
fn ring_self_intersects(ring: &[Coordinate]) -> bool {
    let mut vertices: Vec<Coordinate> = Vec::with_capacity(ring.len());
    for p in ring {
        if vertices.last() != Some(p) {
            vertices.push(*p);
        }
    }
    let edges: Vec<(Coordinate, Coordinate)> =
        vertices.windows(2).map(|w| (w[0], w[1])).collect();
    let n = edges.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if adjacent {
                continue;
            }
            if segments_intersect(edges[i], edges[j]) {
                return true;
            }
        }
    }
    false
}

fn orientation(a: Coordinate, b: Coordinate, c: Coordinate) -> f64 {
    (b.lon - a.lon) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lon - a.lon)
}

fn on_segment(a: Coordinate, b: Coordinate, p: Coordinate) -> bool {
    p.lon >= a.lon.min(b.lon)
        && p.lon <= a.lon.max(b.lon)
        && p.lat >= a.lat.min(b.lat)
        && p.lat <= a.lat.max(b.lat)
}

fn segments_intersect(
    (p1, p2): (Coordinate, Coordinate),
    (q1, q2): (Coordinate, Coordinate),
) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::ParentAttributes;

    fn parcel(key: &str, points: &[(f64, f64)]) -> ParentRecord {
        ParentRecord {
            key: key.into(),
            boundary: points.iter().map(|(x, y)| Coordinate::new(*x, *y)).collect(),
            centroid: Coordinate::new(0.5, 0.5),
            attributes: ParentAttributes::default(),
        }
    }

    fn note(key: &str, parent: &str, content: &str) -> ChildRecord {
        ChildRecord {
            key: key.into(),
            parent_key: parent.into(),
            content: content.into(),
        }
    }

    const SQUARE: [(f64, f64); 4] = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
    const BOWTIE: [(f64, f64); 4] = [(0.0, 0.0), (1.0, 1.0), (1.0, 0.0), (0.0, 1.0)];

    fn validator() -> Validator {
        Validator::new(BoundingRegion::default(), 10_000.0)
    }

    #[test]
    fn test_open_ring_is_closed_in_output() {
        let outcome = validator().validate(&[parcel("a", &SQUARE)], &[]);
        assert_eq!(outcome.report.valid_parents(), 1);
        assert!(outcome.parents[0].is_ring_closed());
        assert_eq!(outcome.parents[0].boundary.len(), 5);
    }

    #[test]
    fn test_degenerate_boundary_rejected() {
        let line = parcel("line", &[(0.0, 0.0), (1.0, 1.0), (0.0, 0.0)]);
        let reasons = validator().check_parent(&line.with_closed_ring());
        assert!(matches!(
            reasons[0],
            ValidationIssue::DegenerateBoundary { distinct_points: 2 }
        ));
    }

    #[test]
    fn test_self_intersecting_boundary_rejected() {
        let reasons = validator().check_parent(&parcel("bowtie", &BOWTIE).with_closed_ring());
        assert_eq!(reasons, vec![ValidationIssue::SelfIntersectingBoundary]);
    }

    #[test]
    fn test_repeated_vertices_are_not_a_crossing() {
        let repeated_corner = parcel(
            "corner",
            &[(0.0, 0.0), (1.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)],
        );
        assert!(validator()
            .check_parent(&repeated_corner.with_closed_ring())
            .is_empty());

        let repeated_close = parcel(
            "close",
            &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0), (0.0, 0.0)],
        );
        assert!(validator()
            .check_parent(&repeated_close.with_closed_ring())
            .is_empty());

        let outcome = validator().validate(&[repeated_corner, repeated_close], &[]);
        assert_eq!(outcome.report.valid_parents(), 2);
    }

    #[test]
    fn test_out_of_region_and_area() {
        let region = BoundingRegion {
            min_lon: -1.0,
            max_lon: 0.5,
            min_lat: -1.0,
            max_lat: 2.0,
        };
        let mut p = parcel("far", &SQUARE);
        p.attributes.area = Some(-3.0);

        let reasons = Validator::new(region, 100.0).check_parent(&p.with_closed_ring());
        assert!(matches!(reasons[0], ValidationIssue::OutOfRegion { index: 1, .. }));
        assert!(matches!(reasons[1], ValidationIssue::AreaOutOfRange { .. }));
    }

    #[test]
    fn test_child_of_invalid_parent_is_reported() {
        let parents = vec![parcel("good", &SQUARE), parcel("bad", &BOWTIE)];
        let children = vec![
            note("n1", "good", "fence repaired"),
            note("n2", "bad", "owner called"),
            note("n3", "missing", "orphan"),
            note("n4", "good", "   "),
        ];

        let outcome = validator().validate(&parents, &children);
        assert_eq!(outcome.children.len(), 1);
        assert_eq!(outcome.report.children.invalid, 3);

        let child_issues: Vec<_> = outcome.report.invalid_for(RecordKind::Child).collect();
        assert_eq!(child_issues.len(), 3);
        assert!(child_issues[0]
            .reasons
            .iter()
            .any(|r| matches!(r, ValidationIssue::UnresolvedParent { parent_key } if parent_key == "bad")));
        assert_eq!(child_issues[1].record_index, 2);
        assert_eq!(child_issues[2].reasons, vec![ValidationIssue::EmptyContent]);
    }

    #[test]
    fn test_duplicate_parent_key() {
        let outcome = validator().validate(&[parcel("a", &SQUARE), parcel("a", &SQUARE)], &[]);
        assert_eq!(outcome.report.valid_parents(), 1);
        assert!(matches!(
            outcome.report.invalid_records[0].reasons[0],
            ValidationIssue::DuplicateKey { .. }
        ));
    }

    #[test]
    fn test_invalid_fraction_threshold() {
        let parents: Vec<_> = (0..9).map(|i| parcel(&format!("p{i}"), &SQUARE)).collect();
        let mut with_bad = parents.clone();
        with_bad.push(parcel("x", &BOWTIE));

        let report = validator().validate(&with_bad, &[]).report;
        assert!((report.invalid_fraction() - 0.1).abs() < f64::EPSILON);
        assert!(!report.exceeds(0.10));
        assert!(report.exceeds(0.05));

        assert_eq!(ValidationReport::default().invalid_fraction(), 0.0);
    }
}
