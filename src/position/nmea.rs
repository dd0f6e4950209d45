//! Minimal NMEA 0183 reader for the two sentences that carry a position:
//! GGA (fix data) and RMC (recommended minimum). Any talker id is accepted
//! (`$GPGGA`, `$GNRMC`, ...).

use super::fix::Coordinate;

/// Parse one raw line. Anything that is not a usable GGA/RMC position is `None`.
pub fn parse_sentence(line: &str) -> Option<Coordinate> {
    let body = line.trim().strip_prefix('$')?;
    let body = verify_checksum(body)?;

    let mut fields = body.split(',');
    let header = fields.next()?;
    if header.len() != 5 || !header.is_ascii() {
        return None;
    }

    let fields: Vec<&str> = fields.collect();
    match &header[2..] {
        "GGA" => parse_gga(&fields),
        "RMC" => parse_rmc(&fields),
        _ => None,
    }
}

/// Strip and check a trailing `*hh` checksum. Sentences without one are accepted.
fn verify_checksum(body: &str) -> Option<&str> {
    match body.split_once('*') {
        Some((payload, checksum)) => {
            let expected = u8::from_str_radix(checksum.trim(), 16).ok()?;
            let actual = payload.bytes().fold(0u8, |acc, b| acc ^ b);
            (actual == expected).then_some(payload)
        }
        None => Some(body),
    }
}

// time, lat, N/S, lon, E/W, quality, ...
fn parse_gga(fields: &[&str]) -> Option<Coordinate> {
    let quality: u8 = fields.get(5)?.parse().ok()?;
    if quality == 0 {
        return None;
    }
    coordinate(fields.get(1)?, fields.get(2)?, fields.get(3)?, fields.get(4)?)
}

// time, status, lat, N/S, lon, E/W, ...
fn parse_rmc(fields: &[&str]) -> Option<Coordinate> {
    if *fields.get(1)? != "A" {
        return None;
    }
    coordinate(fields.get(2)?, fields.get(3)?, fields.get(4)?, fields.get(5)?)
}

fn coordinate(lat: &str, ns: &str, lon: &str, ew: &str) -> Option<Coordinate> {
    let latitude = match ns {
        "N" => degrees(lat, 2)?,
        "S" => -degrees(lat, 2)?,
        _ => return None,
    };
    let longitude = match ew {
        "E" => degrees(lon, 3)?,
        "W" => -degrees(lon, 3)?,
        _ => return None,
    };

    if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
        return None;
    }
    Some(Coordinate::new(latitude, longitude))
}

/// `ddmm.mmmm` / `dddmm.mmmm` to decimal degrees.
fn degrees(field: &str, degree_digits: usize) -> Option<f64> {
    if field.len() <= degree_digits || !field.is_ascii() {
        return None;
    }
    let (deg, min) = field.split_at(degree_digits);
    let deg: f64 = deg.parse().ok()?;
    let min: f64 = min.parse().ok()?;
    if !(0.0..60.0).contains(&min) {
        return None;
    }
    Some(deg + min / 60.0)
}
