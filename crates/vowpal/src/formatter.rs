/// Translates structured feature data into vw input-format lines.
///
/// A line is composed from two halves so the shared half is only formatted
/// once per call: the common part covers features shared by every item of a
/// predict/train call, the item part covers what is specific to one item.
/// The reverse direction, mapping vw's feature names in an audit trace back
/// to something readable, goes through [`VowpalFormatter::parse_element`].
pub trait VowpalFormatter {
    /// Features shared by every item of one call.
    type Common;
    /// Features specific to one item.
    type Item;

    /// Formats the part of the line shared by every item in one call.
    ///
    /// Runs once per predict/train call. The returned string must start
    /// with the `|` namespace marker.
    fn format_common_features(&self, common: &Self::Common) -> String;

    /// Formats the part of the line specific to one item.
    ///
    /// Runs once per item, so this is the hot path; cache what you can.
    /// With namespaces the result starts with `|NAMESPACE`, without them it
    /// must not contain `|` at all.
    fn format_item_features(&self, common: &Self::Common, item: &Self::Item) -> String;

    /// Composes a full vw line from its two halves, optionally prefixed by
    /// a label and weight for training.
    fn compose_line(
        &self,
        common_part: &str,
        item_part: &str,
        label: Option<f64>,
        weight: Option<f64>,
    ) -> String {
        match label {
            Some(label) => {
                let weight = weight.map(|w| w.to_string()).unwrap_or_default();
                format!("{label} {weight} {common_part} {item_part}")
            }
            None => format!("{common_part} {item_part}"),
        }
    }

    /// Splits one `namespace^feature` element of an audit trace into its
    /// two halves.
    ///
    /// Override to translate vw's internal names into human readable ones,
    /// e.g. by looking item ids up in a database.
    fn parse_element(&self, element: &str) -> (String, String) {
        match element.split_once('^') {
            Some((namespace, feature)) => (namespace.to_string(), feature.to_string()),
            None => (String::new(), element.to_string()),
        }
    }
}

/// Formatter for callers whose features already are vw input-format
/// strings; both halves pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughFormatter;

impl VowpalFormatter for PassthroughFormatter {
    type Common = String;
    type Item = String;

    fn format_common_features(&self, common: &String) -> String {
        common.clone()
    }

    fn format_item_features(&self, _common: &String, item: &String) -> String {
        item.clone()
    }
}
