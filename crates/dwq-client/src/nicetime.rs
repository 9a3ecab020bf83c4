//! Human-friendly elapsed/ETA formatting for `-P`/`-R` progress output.

pub fn nicetime(total_secs: f64) -> String {
    let secs_total = total_secs.round() as i64;
    let minutes_total = secs_total / 60;
    let hrs_total = minutes_total / 60;
    let days = hrs_total / 24;
    let secs = secs_total % 60;
    let minutes = minutes_total % 60;
    let hrs = hrs_total % 24;

    let mut res = String::new();
    if days != 0 {
        res.push_str(&format!("{days}d:"));
    }
    if hrs != 0 {
        res.push_str(&format!("{hrs}h:"));
    }
    if minutes != 0 {
        if hrs != 0 && minutes < 10 {
            res.push('0');
        }
        res.push_str(&format!("{minutes}m:"));
    }
    if minutes != 0 && secs < 10 {
        res.push('0');
    }
    res.push_str(&format!("{secs}s"));
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_seconds_only() {
        assert_eq!(nicetime(9.0), "9s");
    }

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(nicetime(65.0), "1m:05s");
    }

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(nicetime(3725.0), "1h:02m:05s");
    }
}
