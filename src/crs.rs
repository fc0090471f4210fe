use std::fmt;
use std::str::FromStr;

use crate::error::CrsError;

/// Coordinate reference system identified by an authority code, e.g. `EPSG:3044`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Crs {
    authority: String,
    code: String,
}

impl Crs {
    /// Numeric codes are stored without leading zeros, so `EPSG:03044`
    /// equals `EPSG:3044`.
    pub fn new(authority: &str, code: &str) -> Self {
        let code = if !code.is_empty() && code.chars().all(|c| c.is_ascii_digit()) {
            match code.trim_start_matches('0') {
                "" => "0",
                stripped => stripped,
            }
        } else {
            code
        };
        Self {
            authority: authority.to_ascii_uppercase(),
            code: code.to_string(),
        }
    }

    pub fn epsg(code: u32) -> Self {
        Self::new("EPSG", &code.to_string())
    }

    /// WGS 84, the default for GeoJSON without a `crs` member.
    pub fn wgs84() -> Self {
        Self::epsg(4326)
    }

    /// Canonical `AUTHORITY:CODE` form, the value compared between layers.
    pub fn authid(&self) -> String {
        format!("{}:{}", self.authority, self.code)
    }

    /// The `crs` member written into GeoJSON output.
    pub fn to_geojson_member(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "name",
            "properties": { "name": format!("urn:ogc:def:crs:{}::{}", self.authority, self.code) }
        })
    }

    /// Reads the legacy GeoJSON `crs` member. Only named CRS are understood.
    pub fn from_geojson_member(member: &serde_json::Value) -> Result<Self, CrsError> {
        member
            .get("properties")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .ok_or_else(|| CrsError::Unrecognised(member.to_string()))
            .and_then(str::parse)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.authority, self.code)
    }
}

impl FromStr for Crs {
    type Err = CrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let unrecognised = || CrsError::Unrecognised(s.to_string());

        if let Some(rest) = trimmed.strip_prefix("urn:ogc:def:crs:") {
            // urn:ogc:def:crs:EPSG::3044, urn:ogc:def:crs:EPSG:6.3:26986, urn:ogc:def:crs:OGC:1.3:CRS84
            let parts: Vec<&str> = rest.split(':').collect();
            if parts.len() < 2 {
                return Err(unrecognised());
            }
            let authority = parts[0];
            let code = parts[parts.len() - 1];
            if authority.eq_ignore_ascii_case("OGC") && code.eq_ignore_ascii_case("CRS84") {
                return Ok(Crs::wgs84());
            }
            return Self::from_parts(authority, code).ok_or_else(unrecognised);
        }

        if trimmed.eq_ignore_ascii_case("CRS84") {
            return Ok(Crs::wgs84());
        }

        let (authority, code) = trimmed.split_once(':').ok_or_else(unrecognised)?;
        Self::from_parts(authority, code).ok_or_else(unrecognised)
    }
}

impl Crs {
    fn from_parts(authority: &str, code: &str) -> Option<Self> {
        let authority = authority.trim();
        let code = code.trim();
        if authority.is_empty()
            || code.is_empty()
            || !authority.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return None;
        }
        if authority.eq_ignore_ascii_case("EPSG") && !code.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Crs::new(authority, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_zeros_do_not_change_the_crs() {
        assert_eq!("EPSG:03044".parse::<Crs>().unwrap(), Crs::epsg(3044));
        assert_eq!(
            "urn:ogc:def:crs:EPSG::003044".parse::<Crs>().unwrap().authid(),
            "EPSG:3044"
        );
        assert_eq!(Crs::new("EPSG", "000").authid(), "EPSG:0");
    }

    #[test]
    fn parses_common_forms() {
        assert_eq!("EPSG:3044".parse::<Crs>().unwrap(), Crs::epsg(3044));
        assert_eq!("epsg:25832".parse::<Crs>().unwrap().authid(), "EPSG:25832");
        assert_eq!(
            "urn:ogc:def:crs:EPSG::3044".parse::<Crs>().unwrap(),
            Crs::epsg(3044)
        );
        assert_eq!(
            "urn:ogc:def:crs:OGC:1.3:CRS84".parse::<Crs>().unwrap(),
            Crs::wgs84()
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!("3044".parse::<Crs>().is_err());
        assert!("EPSG:abc".parse::<Crs>().is_err());
        assert!("".parse::<Crs>().is_err());
    }

    #[test]
    fn geojson_member_round_trip() {
        let crs = Crs::epsg(3044);
        let member = crs.to_geojson_member();
        assert_eq!(Crs::from_geojson_member(&member).unwrap(), crs);
    }
}
