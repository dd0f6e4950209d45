//! Raspberry Pi 5 core-rail current via the PMIC ADC (`vcgencmd pmic_read_adc`).

use tokio::process::Command;

const CORE_RAIL: &str = "VDD_CORE_A current";

/// Current draw of the core rail in amps, or `None` when the tool is missing or silent.
pub async fn read_core_current() -> Option<f64> {
    let output = match Command::new("vcgencmd").arg("pmic_read_adc").output().await {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            log::debug!("vcgencmd exited with {}", output.status);
            return None;
        }
        Err(err) => {
            log::debug!("vcgencmd unavailable: {err}");
            return None;
        }
    };

    parse_core_current(&String::from_utf8_lossy(&output.stdout))
}

/// Pull the amps out of a line like `VDD_CORE_A current(7)=2.81203000A`.
pub fn parse_core_current(adc_output: &str) -> Option<f64> {
    adc_output
        .lines()
        .find(|line| line.contains(CORE_RAIL))
        .and_then(|line| line.split_once(")="))
        .and_then(|(_, value)| value.trim().strip_suffix('A'))
        .and_then(|amps| amps.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_core_rail_line() {
        let output = "     3V7_WL_SW_A current(0)=0.00000000A\n\
                      \x20    VDD_CORE_A current(7)=2.81203000A\n\
                      \x20    VDD_CORE_V volt(15)=0.87000000V\n";
        assert_eq!(parse_core_current(output), Some(2.81203));
    }

    #[test]
    fn missing_or_garbled_rail_is_none() {
        assert_eq!(parse_core_current("VDD_CORE_V volt(15)=0.87V"), None);
        assert_eq!(parse_core_current("VDD_CORE_A current(7)=n/aA"), None);
        assert_eq!(parse_core_current(""), None);
    }
}
