//! The single canonical HEALPix NSIDE=64 NESTED implementation.
//!
//! Builder and reader both call [`pixel_of`] — there is exactly one
//! copy of this algorithm in the crate, precisely because a second,
//! slightly-different copy is how the design notes say pixel ids end
//! up silently corrupted (the `healpix_pixel` field is a durable key).

use std::collections::HashSet;
use std::f64::consts::{FRAC_PI_2, PI};

/// HEALPix resolution parameter used throughout this catalog.
pub const NSIDE: u32 = 64;

/// Total number of pixels at [`NSIDE`] (`12 * NSIDE^2`).
pub const NPIX: u32 = 12 * NSIDE * NSIDE;

/// Approximate linear pixel size in degrees, used to size the
/// dense-sampling fallback in [`pixels_in_cone`].
const PIXEL_DIAMETER_DEG: f64 = 56.0 / (NSIDE as f64); // ~0.84 deg at NSIDE=64

//fp pixel_of
/// Convert equatorial coordinates to a NESTED-scheme HEALPix pixel id.
///
/// Standard HEALPix equatorial/polar-cap branching on `z = sin(dec)`:
/// the equatorial belt (`|z| <= 2/3`) and the two polar caps
/// (`|z| > 2/3`) use different projections, matched at the boundary.
/// Numerically stable at both poles and at the `|z| = 2/3` seam.
pub fn pixel_of(ra_deg: f64, dec_deg: f64) -> u32 {
    let ra = ra_deg.to_radians().rem_euclid(2.0 * PI);
    let dec = dec_deg.to_radians().clamp(-FRAC_PI_2, FRAC_PI_2);

    let z = dec.sin();
    let za = z.abs();
    let tt = ra / FRAC_PI_2; // in [0, 4)

    let (ix, iy, face_num);
    if za <= 2.0 / 3.0 {
        // Equatorial belt.
        let temp1 = NSIDE as f64 * (0.5 + tt);
        let temp2 = NSIDE as f64 * (z * 0.75);
        let jp = (temp1 - temp2).floor() as i64; // ascending edge line index
        let jm = (temp1 + temp2).floor() as i64; // descending edge line index
        let ifp = jp.div_euclid(NSIDE as i64);
        let ifm = jm.div_euclid(NSIDE as i64);
        face_num = if ifp == ifm {
            (ifp & 3) + 4
        } else if ifp < ifm {
            ifp & 3
        } else {
            (ifm & 3) + 8
        };
        ix = jm.rem_euclid(NSIDE as i64);
        iy = (NSIDE as i64 - 1) - jp.rem_euclid(NSIDE as i64);
    } else {
        // Polar caps.
        let ntt = (tt.floor() as i64).clamp(0, 3);
        let tp = tt - ntt as f64; // in [0, 1)
        let tmp = NSIDE as f64 * (3.0 * (1.0 - za)).max(0.0).sqrt();

        let jp = (tp * tmp).floor() as i64;
        let jm = ((1.0 - tp) * tmp).floor() as i64;
        let jp = jp.min(NSIDE as i64 - 1);
        let jm = jm.min(NSIDE as i64 - 1);

        if z >= 0.0 {
            ix = (NSIDE as i64 - 1) - jm;
            iy = (NSIDE as i64 - 1) - jp;
            face_num = ntt;
        } else {
            ix = jp;
            iy = jm;
            face_num = ntt + 8;
        }
    }

    let ix_bits = interleave_bits(ix as u32);
    let iy_bits = interleave_bits(iy as u32);
    let pixel_in_face = ix_bits | (iy_bits << 1);
    let pixel = (face_num as u32) * NSIDE * NSIDE + pixel_in_face;
    pixel.min(NPIX - 1)
}

/// Spread the low `log2(NSIDE)` bits of `v` so there's a zero between
/// each original bit — the standard NESTED-scheme bit interleave.
fn interleave_bits(v: u32) -> u32 {
    let mut x = v as u64 & 0xFFFFFFFF;
    x = (x | (x << 16)) & 0x0000FFFF0000FFFF;
    x = (x | (x << 8)) & 0x00FF00FF00FF00FF;
    x = (x | (x << 4)) & 0x0F0F0F0F0F0F0F0F;
    x = (x | (x << 2)) & 0x3333333333333333;
    x = (x | (x << 1)) & 0x5555555555555555;
    x as u32
}

//fp haversine_deg
/// Great-circle distance in degrees between two `(ra, dec)` points,
/// both in degrees. Numerically stable for small angles.
pub fn haversine_deg(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (lat1, lat2) = (dec1.to_radians(), dec2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (ra2 - ra1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let a = a.clamp(0.0, 1.0);
    2.0 * a.sqrt().asin().to_degrees()
}

//fp pixels_in_cone
/// Every pixel whose footprint intersects the spherical cap centered
/// at `(ra_deg, dec_deg)` with angular radius `radius_deg`.
///
/// Inclusion is conservative (false positives are fine, callers do a
/// precise per-record distance check; false negatives are forbidden).
/// A radius `>= 180 deg` returns every pixel in `[0, NPIX)` directly.
/// Otherwise this densely samples the cap on a ring/meridian grid fine
/// enough that no pixel of diameter `~PIXEL_DIAMETER_DEG` can be
/// missed, then maps every sample through [`pixel_of`] itself — so the
/// candidate set can never diverge from the stored `healpix_pixel`
/// values, by construction.
pub fn pixels_in_cone(ra_deg: f64, dec_deg: f64, radius_deg: f64) -> HashSet<u32> {
    let mut pixels = HashSet::new();
    if radius_deg >= 180.0 {
        pixels.extend(0..NPIX);
        return pixels;
    }

    pixels.insert(pixel_of(ra_deg, dec_deg));

    // Sample the cap generously: cover radius + one pixel diameter so a
    // pixel whose center lies just outside `radius` but whose footprint
    // pokes into the cap is still included.
    let sample_radius = (radius_deg + PIXEL_DIAMETER_DEG).min(180.0);
    // Angular step small enough that consecutive samples land in the
    // same or a neighboring pixel: a quarter of the pixel diameter.
    let step_deg = (PIXEL_DIAMETER_DEG / 4.0).max(1.0e-6);

    let mut r = step_deg / 2.0;
    while r <= sample_radius {
        // Number of samples around this ring so arc spacing ~= step_deg.
        let circumference_deg = 360.0 * (r.to_radians().sin()).abs().max(r / 180.0);
        let n_samples = ((circumference_deg / step_deg).ceil() as u64).max(8);
        for i in 0..n_samples {
            let bearing = 2.0 * PI * (i as f64) / (n_samples as f64);
            let (sra, sdec) = destination_point(ra_deg, dec_deg, r, bearing);
            pixels.insert(pixel_of(sra, sdec));
        }
        r += step_deg;
    }

    pixels
}

/// Point at great-circle distance `dist_deg` and bearing `bearing_rad`
/// (radians, 0 = north) from `(ra_deg, dec_deg)`. Used only to generate
/// sample points for [`pixels_in_cone`]'s dense fallback.
fn destination_point(ra_deg: f64, dec_deg: f64, dist_deg: f64, bearing_rad: f64) -> (f64, f64) {
    let lat1 = dec_deg.to_radians();
    let lon1 = ra_deg.to_radians();
    let d = dist_deg.to_radians();

    let lat2 = (lat1.sin() * d.cos() + lat1.cos() * d.sin() * bearing_rad.cos()).asin();
    let y = bearing_rad.sin() * d.sin() * lat1.cos();
    let x = d.cos() - lat1.sin() * lat2.sin();
    let lon2 = lon1 + y.atan2(x);

    let dec_out = lat2.to_degrees().clamp(-90.0, 90.0);
    let ra_out = lon2.to_degrees().rem_euclid(360.0);
    (ra_out, dec_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_of_is_in_range() {
        let grid: Vec<(f64, f64)> = (0..36)
            .flat_map(|i| {
                (0..19).map(move |j| (i as f64 * 10.0, -90.0 + j as f64 * 10.0))
            })
            .collect();
        for (ra, dec) in grid {
            let p = pixel_of(ra, dec);
            assert!(p < NPIX, "pixel {p} out of range for ({ra}, {dec})");
        }
    }

    #[test]
    fn pixel_of_stable_at_poles() {
        let north_a = pixel_of(10.0, 89.999);
        let north_b = pixel_of(10.0, 89.9999);
        assert!(north_a < NPIX && north_b < NPIX);
        let south_a = pixel_of(10.0, -89.999);
        assert!(south_a < NPIX);
    }

    #[test]
    fn pixel_of_stable_at_two_thirds_boundary() {
        // |z| = 2/3 is the equatorial/polar-cap seam.
        let dec_at_seam = (2.0f64 / 3.0).asin().to_degrees();
        for eps in [-0.01, -0.0001, 0.0, 0.0001, 0.01] {
            let p = pixel_of(45.0, dec_at_seam + eps);
            assert!(p < NPIX);
        }
    }

    #[test]
    fn pixel_of_deterministic() {
        assert_eq!(pixel_of(56.75, 24.12), pixel_of(56.75, 24.12));
        assert_eq!(pixel_of(0.0, 0.0), pixel_of(360.0, 0.0));
    }

    #[test]
    fn haversine_zero_at_same_point() {
        assert!(haversine_deg(10.0, 20.0, 10.0, 20.0) < 1e-9);
    }

    #[test]
    fn haversine_matches_known_separation() {
        // Two points one degree apart along the equator.
        let d = haversine_deg(0.0, 0.0, 1.0, 0.0);
        assert!((d - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cone_contains_center_pixel() {
        let center_pixel = pixel_of(56.75, 24.12);
        let pixels = pixels_in_cone(56.75, 24.12, 0.1);
        assert!(pixels.contains(&center_pixel));
    }

    #[test]
    fn cone_full_sphere_returns_all_pixels() {
        let pixels = pixels_in_cone(0.0, 0.0, 180.0);
        assert_eq!(pixels.len(), NPIX as usize);
    }

    #[test]
    fn cone_no_false_negatives_dense_sample() {
        // Every star on a fine grid within radius must have its pixel
        // present in the candidate set.
        let (ra, dec, radius) = (266.417, -29.006, 1.0);
        let pixels = pixels_in_cone(ra, dec, radius);
        for i in 0..200 {
            let bearing = 2.0 * PI * (i as f64) / 200.0;
            let frac = (i % 17) as f64 / 17.0;
            let (sra, sdec) = destination_point(ra, dec, radius * frac, bearing);
            if haversine_deg(ra, dec, sra, sdec) <= radius {
                let p = pixel_of(sra, sdec);
                assert!(pixels.contains(&p), "missed pixel {p} at ({sra}, {sdec})");
            }
        }
    }
}
