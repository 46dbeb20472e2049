use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

/// Ordered header fields, each name mapping to its list of values.
///
/// Unlike [`HeaderMap`] this keeps the field order it was built with and can
/// hold a name with no values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    fields: Vec<(String, Vec<String>)>,
}

impl HeaderFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` to the field called `name`, creating the field at the
    /// end if it does not exist yet. Names compare case-insensitively.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.fields[idx].1.push(value),
            None => self.fields.push((name, vec![value])),
        }
    }

    /// Adds a field with exactly these values, keeping any earlier field of
    /// the same name as a separate entry.
    pub fn push_field(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.fields.push((name.into(), values));
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name).map(|idx| self.fields[idx].1.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_inner(self) -> Vec<(String, Vec<String>)> {
        self.fields
    }

    /// Builds fields from a [`HeaderMap`], skipping values that are not
    /// visible ASCII.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut fields = Self::new();
        for name in map.keys() {
            let values = map
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .map(str::to_string)
                .collect();
            fields.push_field(name.as_str(), values);
        }
        fields
    }

    /// Converts to a [`HeaderMap`]. Invalid names or values and fields with
    /// no values are dropped.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, values) in &self.fields {
            let Ok(name) = HeaderName::try_from(name.as_str()) else {
                continue;
            };
            for value in values {
                if let Ok(value) = HeaderValue::from_str(value) {
                    map.append(name.clone(), value);
                }
            }
        }
        map
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }
}

impl From<Vec<(String, Vec<String>)>> for HeaderFields {
    fn from(fields: Vec<(String, Vec<String>)>) -> Self {
        Self { fields }
    }
}

impl<N, V> FromIterator<(N, V)> for HeaderFields
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut fields = Self::new();
        for (name, value) in iter {
            fields.append(name, value);
        }
        fields
    }
}

/// Everything about a cached response except its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    pub status: StatusCode,
    pub headers: HeaderFields,
}

impl MetadataRecord {
    pub fn new(status: StatusCode, headers: HeaderFields) -> Self {
        Self { status, headers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_groups_values_under_first_field() {
        let mut fields = HeaderFields::new();
        fields.append("Set-Cookie", "a=1");
        fields.append("Content-Type", "text/html");
        fields.append("set-cookie", "b=2");

        assert_eq!(fields.len(), 2);
        assert_eq!(
            fields.get("SET-COOKIE"),
            Some(&["a=1".to_string(), "b=2".to_string()][..])
        );
        let names: Vec<_> = fields.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["Set-Cookie", "Content-Type"]);
    }

    #[test]
    fn header_map_conversion_keeps_repeated_values() -> anyhow::Result<()> {
        let mut map = HeaderMap::new();
        map.append("vary", "accept".parse()?);
        map.append("vary", "accept-encoding".parse()?);
        map.insert("etag", "\"v1\"".parse()?);

        let fields = HeaderFields::from_header_map(&map);
        assert_eq!(
            fields.get("vary"),
            Some(&["accept".to_string(), "accept-encoding".to_string()][..])
        );
        assert_eq!(fields.to_header_map(), map);
        Ok(())
    }

    #[test]
    fn header_map_conversion_drops_unrepresentable_fields() {
        let mut fields = HeaderFields::new();
        fields.push_field("x-empty", Vec::new());
        fields.push_field("bad name", vec!["v".to_string()]);
        fields.push_field("x-ok", vec!["fine".to_string(), "bad\nvalue".to_string()]);

        let map = fields.to_header_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("x-ok").and_then(|v| v.to_str().ok()), Some("fine"));
    }
}
