use crate::Amount;
use bigdecimal::{num_bigint::Sign, BigDecimal, RoundingMode};

/// Render without exponent notation.
pub(crate) fn plain(value: &BigDecimal) -> String {
    let (int, scale) = value.as_bigint_and_exponent();
    let negative = int.sign() == Sign::Minus;
    let digits = int.magnitude().to_string();

    let body = if scale <= 0 {
        let mut digits = digits;
        if digits != "0" {
            digits.push_str(&"0".repeat(scale.unsigned_abs() as usize));
        }
        digits
    } else {
        let scale = scale as usize;
        if digits.len() > scale {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            format!("{int_part}.{frac_part}")
        } else {
            format!("0.{}{digits}", "0".repeat(scale - digits.len()))
        }
    };

    if negative {
        format!("-{body}")
    } else {
        body
    }
}

fn group_thousands(int_part: &str) -> String {
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

impl Amount {
    /// Human-readable form: thousands separators and exactly `decimals`
    /// fraction digits, rounded half-up. NaN renders as `"0"`.
    pub fn format(&self, decimals: u32) -> String {
        let Some(value) = &self.0 else {
            return "0".to_string();
        };

        let rounded = value.with_scale_round(i64::from(decimals), RoundingMode::HalfUp);
        let text = plain(&rounded);
        let (sign, unsigned) = text
            .strip_prefix('-')
            .map_or(("", text.as_str()), |rest| ("-", rest));
        let (int_part, frac_part) = unsigned
            .split_once('.')
            .map_or((unsigned, None), |(int, frac)| (int, Some(frac)));

        let grouped = group_thousands(int_part);
        match frac_part {
            Some(frac) => format!("{sign}{grouped}.{frac}"),
            None => format!("{sign}{grouped}"),
        }
    }

    /// Like [`Amount::format`], but caps the output at `>max`.
    pub fn format_max(&self, max: &Self, decimals: u32) -> String {
        if self.gt(max) {
            format!(">{}", max.format(decimals))
        } else {
            self.format(decimals)
        }
    }
}
