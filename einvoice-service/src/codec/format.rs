/// Render minor units as a decimal string with exactly `minor_unit` decimals.
pub fn format_amount(minor: i64, minor_unit: u32) -> String {
    if minor_unit == 0 {
        return minor.to_string();
    }
    let divider = 10i64.pow(minor_unit);
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    let whole = abs / divider as u64;
    let fraction = abs % divider as u64;
    format!(
        "{sign}{whole}.{fraction:0width$}",
        width = minor_unit as usize
    )
}

/// Minor units as a JSON number value.
pub fn amount_value(minor: i64, minor_unit: u32) -> f64 {
    minor as f64 / 10f64.powi(minor_unit as i32)
}

pub fn format_percent(rate: u32) -> String {
    format!("{rate}.00")
}

/// Integers without decimals, otherwise at most six decimals with trailing zeros trimmed.
pub fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 {
        return format!("{}", quantity as i64);
    }
    let rounded = format!("{:.6}", quantity);
    rounded
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Escape text and attribute values for XML.
pub fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
