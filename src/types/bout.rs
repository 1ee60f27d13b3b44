//! Bouts: half-open time intervals used for exclusion and annotation

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Display hints attached to a bout for downstream plot rendering.
///
/// Not used by aggregation; carried through so an external renderer can
/// shade the interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawProperties {
    pub line_width: f64,
    pub alpha: f64,
    pub face_colour: String,
}

impl DrawProperties {
    /// Purple shading used for nonwear intervals.
    pub fn nonwear() -> Self {
        Self {
            line_width: 0.0,
            alpha: 0.75,
            face_colour: "#764af9".to_string(),
        }
    }
}

/// An interval `[start, end)`.
///
/// Used both as an exclusion window (missing data, deleted from channels)
/// and as an annotation (nonwear, masked from selected statistics only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bout {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draw: Option<DrawProperties>,
}

impl Bout {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            start,
            end,
            draw: None,
        }
    }

    pub fn with_draw(mut self, draw: DrawProperties) -> Self {
        self.draw = Some(draw);
        self
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    /// True when `t` falls inside `[start, end)`.
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t < self.end
    }

    pub fn overlaps(&self, other: &Bout) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Intersection of two bout lists.
///
/// Both inputs must be sorted by start and internally non-overlapping; the
/// output is sorted and carries no draw properties.
pub fn intersect_bouts(a: &[Bout], b: &[Bout]) -> Vec<Bout> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        let start = a[i].start.max(b[j].start);
        let end = a[i].end.min(b[j].end);
        if start < end {
            out.push(Bout::new(start, end));
        }
        // Advance whichever interval finishes first
        if a[i].end < b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }

    out
}

/// Merge overlapping or touching bouts into a sorted, disjoint list.
pub fn merge_bouts(mut bouts: Vec<Bout>) -> Vec<Bout> {
    bouts.sort_by_key(|b| b.start);
    let mut merged: Vec<Bout> = Vec::with_capacity(bouts.len());

    for bout in bouts {
        match merged.last_mut() {
            Some(last) if bout.start <= last.end => {
                if bout.end > last.end {
                    last.end = bout.end;
                }
            }
            _ => merged.push(bout),
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 10, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_contains_is_half_open() {
        let bout = Bout::new(t(10, 0), t(11, 0));
        assert!(bout.contains(t(10, 0)));
        assert!(bout.contains(t(10, 59)));
        assert!(!bout.contains(t(11, 0)));
    }

    #[test]
    fn test_intersection_of_three_lists() {
        let x = vec![Bout::new(t(1, 0), t(5, 0)), Bout::new(t(8, 0), t(12, 0))];
        let y = vec![Bout::new(t(2, 0), t(9, 0))];
        let z = vec![Bout::new(t(0, 0), t(23, 0))];

        let xy = intersect_bouts(&x, &y);
        let xyz = intersect_bouts(&xy, &z);

        assert_eq!(
            xyz,
            vec![Bout::new(t(2, 0), t(5, 0)), Bout::new(t(8, 0), t(9, 0))]
        );
    }

    #[test]
    fn test_intersection_empty_when_disjoint() {
        let a = vec![Bout::new(t(1, 0), t(2, 0))];
        let b = vec![Bout::new(t(2, 0), t(3, 0))];
        assert!(intersect_bouts(&a, &b).is_empty());
    }

    #[test]
    fn test_merge_touching_bouts() {
        let merged = merge_bouts(vec![
            Bout::new(t(3, 0), t(4, 0)),
            Bout::new(t(1, 0), t(2, 0)),
            Bout::new(t(2, 0), t(3, 30)),
        ]);
        assert_eq!(merged, vec![Bout::new(t(1, 0), t(4, 0))]);
    }

    #[test]
    fn test_nonwear_draw_properties() {
        let bout = Bout::new(t(1, 0), t(2, 0)).with_draw(DrawProperties::nonwear());
        let draw = bout.draw.as_ref().unwrap();
        assert_eq!(draw.face_colour, "#764af9");
        assert_eq!(draw.alpha, 0.75);
        assert_eq!(bout.length(), Duration::hours(1));
    }
}
