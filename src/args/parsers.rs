use crate::config::{DurationValue, parse_duration_value, parse_header};

pub(super) fn parse_duration_arg(s: &str) -> Result<DurationValue, String> {
    parse_duration_value(s).map_err(|err| err.to_string())?;
    Ok(DurationValue::Text(s.trim().to_owned()))
}

pub(super) fn parse_header_arg(s: &str) -> Result<String, String> {
    parse_header(s).map_err(|err| err.to_string())?;
    Ok(s.to_owned())
}

pub(super) fn parse_rate_arg(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .trim()
        .parse()
        .map_err(|err| format!("Invalid rate '{}': {}", s, err))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("Invalid rate '{}'. Use a finite number >= 0.", s));
    }
    Ok(value)
}
