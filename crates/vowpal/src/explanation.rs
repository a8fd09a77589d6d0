use crate::{VowpalError, VowpalFormatter};

/// One feature of an audit trace, with its learned weight and its share of
/// the final score.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplanationFeature {
    /// Namespace/feature name pairs, one per element of an interaction,
    /// resolved through [`VowpalFormatter::parse_element`].
    pub names: Vec<(String, String)>,
    /// The feature name exactly as vw printed it, e.g. `c^c8*f^f102`.
    pub feature: String,
    /// vw's internal hash of the feature name.
    pub hash_index: u64,
    /// Value of the feature in the input line.
    pub value: f64,
    /// Weight learned by vw for this feature.
    pub weight: f64,
    /// `value * weight`.
    pub potential: f64,
    /// `|potential|` normalized by the sum of absolute potentials.
    pub relative_potential: f64,
}

/// Parses the explanation emitted by vw's audit mode into features ranked
/// by their contribution to the score.
///
/// The trace is tab-separated `name:hash:value:weight[@extra]` records;
/// interaction names join their elements with `*`.
pub fn parse_explanation<F: VowpalFormatter>(
    formatter: &F,
    explanation: &str,
) -> Result<Vec<ExplanationFeature>, VowpalError> {
    let mut features = Vec::new();
    let mut potential_sum = 0.0f64;

    for record in explanation.split('\t') {
        let record = record.trim();
        if record.is_empty() {
            continue;
        }
        let fields: Vec<&str> = record.split(':').collect();
        if fields.len() < 4 {
            return Err(VowpalError::Explanation {
                reason: format!("expected name:hash:value:weight, got {record:?}"),
            });
        }
        let feature = fields[0].to_string();
        let hash_index = fields[1].parse::<u64>().map_err(|_| VowpalError::Explanation {
            reason: format!("hash index {:?} is not an integer", fields[1]),
        })?;
        let value = fields[2].parse::<f64>().map_err(|_| VowpalError::Explanation {
            reason: format!("value {:?} is not a float", fields[2]),
        })?;
        // The weight field may carry gradient bookkeeping after an `@`.
        let weight_field = fields[3].split('@').next().unwrap_or_default();
        let weight = weight_field.parse::<f64>().map_err(|_| VowpalError::Explanation {
            reason: format!("weight {:?} is not a float", weight_field),
        })?;

        let names = feature
            .split('*')
            .map(|element| formatter.parse_element(element))
            .collect();
        let potential = value * weight;
        potential_sum += potential.abs();
        features.push(ExplanationFeature {
            names,
            feature,
            hash_index,
            value,
            weight,
            potential,
            relative_potential: 0.0,
        });
    }

    // All-unknown features leave the sum at zero; keep the division sound.
    let norm = if potential_sum == 0.0 { 1.0 } else { potential_sum };
    for feature in &mut features {
        feature.relative_potential = (feature.potential / norm).abs();
    }
    features.sort_by(|a, b| {
        b.relative_potential
            .partial_cmp(&a.relative_potential)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(features)
}
