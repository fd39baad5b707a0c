//! Recipe records and grading scales.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{CoreError, CoreResult};

/// Inclusive `[lo, hi]` band of average grade values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeRange(pub i64, pub i64);

impl GradeRange {
    pub fn contains(&self, value: i64) -> bool {
        self.0 <= value && value <= self.1
    }
}

/// Ordered map of grade letter to value band.
///
/// Key order is meaningful: first entry is the best grade, last the worst.
/// A plain JSON object would lose that under alphabetical map keys, so the
/// scale keeps its own `Vec` and (de)serializes through it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradingScale(Vec<(String, GradeRange)>);

impl GradingScale {
    pub fn from_pairs(pairs: Vec<(String, GradeRange)>) -> Self {
        Self(pairs)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Grade letters, best to worst.
    pub fn keys(&self) -> Vec<&str> {
        self.0.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Rank of a grade within the scale; 0 is best.
    pub fn rank_of(&self, grade: &str) -> Option<usize> {
        self.0.iter().position(|(k, _)| k == grade)
    }

    /// Grade whose band contains `floor(average)`.
    pub fn grade_for(&self, average: f64) -> Option<&str> {
        let value = average.floor() as i64;
        self.0
            .iter()
            .find(|(_, range)| range.contains(value))
            .map(|(grade, _)| grade.as_str())
    }

    /// Bands must be well-formed and pairwise disjoint.
    pub fn validate(&self) -> CoreResult<()> {
        for (grade, range) in &self.0 {
            if range.0 > range.1 {
                return Err(CoreError::validation(format!(
                    "grading scale {grade}: lo {} exceeds hi {}",
                    range.0, range.1
                )));
            }
        }
        for (i, (ga, ra)) in self.0.iter().enumerate() {
            for (gb, rb) in self.0.iter().skip(i + 1) {
                if ra.0.max(rb.0) <= ra.1.min(rb.1) {
                    return Err(CoreError::validation(format!(
                        "grading scale ranges overlap: {ga} and {gb}"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Serialize for GradingScale {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (grade, range) in &self.0 {
            map.serialize_entry(grade, range)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GradingScale {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ScaleVisitor;

        impl<'de> Visitor<'de> for ScaleVisitor {
            type Value = GradingScale;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of grade to [lo, hi]")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((grade, range)) = map.next_entry::<String, GradeRange>()? {
                    pairs.push((grade, range));
                }
                Ok(GradingScale(pairs))
            }
        }

        deserializer.deserialize_map(ScaleVisitor)
    }
}

/// A benchmark recipe: datasets, optional templates, metrics, grading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub datasets: Vec<String>,
    #[serde(default)]
    pub prompt_templates: Vec<String>,
    pub metrics: Vec<String>,
    #[serde(default)]
    pub grading_scale: GradingScale,
    #[serde(default)]
    pub created_date: String,
}

impl Recipe {
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("recipe name is empty"));
        }
        if self.datasets.is_empty() {
            return Err(CoreError::validation(format!(
                "recipe {} names no datasets",
                self.name
            )));
        }
        self.grading_scale.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale() -> GradingScale {
        serde_json::from_str(r#"{"A": [80, 100], "B": [40, 79], "C": [0, 39]}"#).unwrap()
    }

    #[test]
    fn key_order_survives_roundtrip() -> anyhow::Result<()> {
        let s = scale();
        assert_eq!(s.keys(), vec!["A", "B", "C"]);
        let raw = serde_json::to_string(&s)?;
        let back: GradingScale = serde_json::from_str(&raw)?;
        assert_eq!(back.keys(), vec!["A", "B", "C"]);
        assert_eq!(back, s);
        Ok(())
    }

    #[test]
    fn grade_lookup_floors_the_average() {
        let s = scale();
        assert_eq!(s.grade_for(79.9), Some("B"));
        assert_eq!(s.grade_for(80.0), Some("A"));
        assert_eq!(s.grade_for(100.0), Some("A"));
        assert_eq!(s.grade_for(0.4), Some("C"));
        assert_eq!(s.grade_for(101.0), None);
        assert_eq!(s.rank_of("A"), Some(0));
        assert_eq!(s.rank_of("C"), Some(2));
        assert_eq!(s.rank_of("F"), None);
    }

    #[test]
    fn empty_scale_grades_nothing() {
        let s = GradingScale::default();
        assert!(s.is_empty());
        assert_eq!(s.grade_for(50.0), None);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn overlap_and_inversion_are_rejected() {
        let overlapping: GradingScale =
            serde_json::from_str(r#"{"A": [50, 100], "B": [0, 50]}"#).unwrap();
        assert!(overlapping.validate().is_err());

        let inverted: GradingScale = serde_json::from_str(r#"{"A": [100, 80]}"#).unwrap();
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn recipe_validation() -> anyhow::Result<()> {
        let raw = r#"{
            "name": "Reading Comprehension",
            "datasets": ["squad-mini"],
            "metrics": ["exact_str_match"],
            "grading_scale": {"A": [80, 100], "B": [0, 79]}
        }"#;
        let recipe: Recipe = serde_json::from_str(raw)?;
        recipe.validate()?;
        assert!(recipe.prompt_templates.is_empty());
        assert_eq!(recipe.grading_scale.keys(), vec!["A", "B"]);

        let no_data: Recipe = serde_json::from_str(
            r#"{"name": "x", "datasets": [], "metrics": ["exact_str_match"]}"#,
        )?;
        assert!(no_data.validate().is_err());
        Ok(())
    }
}
