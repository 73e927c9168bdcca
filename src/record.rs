//! The 80-byte star record and its on-disk (little-endian) encoding.
//!
//! This is the compatibility boundary described in the format spec:
//! builder and reader share exactly these `encode`/`decode` methods, so
//! there is only one place the byte layout can drift.

/// Size in bytes of one [`StarRecord`] on disk.
pub const RECORD_SIZE: usize = 80;

//tp StarRecord
/// One Gaia DR3 source, as stored in the catalog.
///
/// `bp_rp` is not stored — it's `bp_mag - rp_mag` and is exposed via
/// [`StarRecord::bp_rp`] rather than taking up 4 of the record's 80
/// bytes twice over.
#[derive(Debug, Clone, PartialEq)]
pub struct StarRecord {
    /// Gaia's 64-bit unique source identifier.
    pub source_id: u64,
    /// Right ascension, degrees, J2016.0.
    pub ra: f64,
    /// Declination, degrees, J2016.0.
    pub dec: f64,
    /// Mean G-band magnitude.
    pub g_mag: f32,
    /// Mean BP-band magnitude.
    pub bp_mag: f32,
    /// Mean RP-band magnitude.
    pub rp_mag: f32,
    /// 1-sigma error on `g_mag`.
    pub g_mag_error: f32,
    /// 1-sigma error on `bp_mag`.
    pub bp_mag_error: f32,
    /// 1-sigma error on `rp_mag`.
    pub rp_mag_error: f32,
    /// Parallax, mas.
    pub parallax: f32,
    /// Proper motion in RA, mas/yr.
    pub pmra: f32,
    /// Proper motion in Dec, mas/yr.
    pub pmdec: f32,
    /// 1-sigma error on `pmra`.
    pub pmra_error: f32,
    /// 1-sigma error on `pmdec`.
    pub pmdec_error: f32,
    /// Renormalized unit weight error.
    pub ruwe: f32,
    /// Number of BP band observations.
    pub bp_obs: u16,
    /// Number of RP band observations.
    pub rp_obs: u16,
    /// `ang2pix_nest(ra, dec, NSIDE=64)`, precomputed by the builder.
    pub healpix_pixel: u32,
    /// Not stored on disk. A slot a downstream name/cross-match
    /// collaborator can fill in after a local lookup; this crate never
    /// populates it, and `decode` always leaves it `None`.
    pub designation: Option<String>,
}

impl StarRecord {
    /// BP-RP color, derived rather than stored.
    pub fn bp_rp(&self) -> f32 {
        self.bp_mag - self.rp_mag
    }

    //fp encode
    /// Write this record's 80-byte little-endian encoding into `out`.
    pub fn encode(&self, out: &mut [u8; RECORD_SIZE]) {
        out[0..8].copy_from_slice(&self.source_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.ra.to_le_bytes());
        out[16..24].copy_from_slice(&self.dec.to_le_bytes());
        out[24..28].copy_from_slice(&self.g_mag.to_le_bytes());
        out[28..32].copy_from_slice(&self.bp_mag.to_le_bytes());
        out[32..36].copy_from_slice(&self.rp_mag.to_le_bytes());
        out[36..40].copy_from_slice(&self.g_mag_error.to_le_bytes());
        out[40..44].copy_from_slice(&self.bp_mag_error.to_le_bytes());
        out[44..48].copy_from_slice(&self.rp_mag_error.to_le_bytes());
        out[48..52].copy_from_slice(&self.parallax.to_le_bytes());
        out[52..56].copy_from_slice(&self.pmra.to_le_bytes());
        out[56..60].copy_from_slice(&self.pmdec.to_le_bytes());
        out[60..64].copy_from_slice(&self.pmra_error.to_le_bytes());
        out[64..68].copy_from_slice(&self.pmdec_error.to_le_bytes());
        out[68..72].copy_from_slice(&self.ruwe.to_le_bytes());
        out[72..74].copy_from_slice(&self.bp_obs.to_le_bytes());
        out[74..76].copy_from_slice(&self.rp_obs.to_le_bytes());
        out[76..80].copy_from_slice(&self.healpix_pixel.to_le_bytes());
    }

    //fp decode
    /// Parse one record out of an 80-byte little-endian slice.
    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        Self {
            source_id: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            ra: f64::from_le_bytes(buf[8..16].try_into().unwrap()),
            dec: f64::from_le_bytes(buf[16..24].try_into().unwrap()),
            g_mag: f32::from_le_bytes(buf[24..28].try_into().unwrap()),
            bp_mag: f32::from_le_bytes(buf[28..32].try_into().unwrap()),
            rp_mag: f32::from_le_bytes(buf[32..36].try_into().unwrap()),
            g_mag_error: f32::from_le_bytes(buf[36..40].try_into().unwrap()),
            bp_mag_error: f32::from_le_bytes(buf[40..44].try_into().unwrap()),
            rp_mag_error: f32::from_le_bytes(buf[44..48].try_into().unwrap()),
            parallax: f32::from_le_bytes(buf[48..52].try_into().unwrap()),
            pmra: f32::from_le_bytes(buf[52..56].try_into().unwrap()),
            pmdec: f32::from_le_bytes(buf[56..60].try_into().unwrap()),
            pmra_error: f32::from_le_bytes(buf[60..64].try_into().unwrap()),
            pmdec_error: f32::from_le_bytes(buf[64..68].try_into().unwrap()),
            ruwe: f32::from_le_bytes(buf[68..72].try_into().unwrap()),
            bp_obs: u16::from_le_bytes(buf[72..74].try_into().unwrap()),
            rp_obs: u16::from_le_bytes(buf[74..76].try_into().unwrap()),
            healpix_pixel: u32::from_le_bytes(buf[76..80].try_into().unwrap()),
            designation: None,
        }
    }

    /// Decode a whole chunk payload (`bytes.len()` must be a multiple of [`RECORD_SIZE`]).
    pub fn decode_all(bytes: &[u8]) -> Vec<StarRecord> {
        bytes
            .chunks_exact(RECORD_SIZE)
            .map(|c| Self::decode(c.try_into().unwrap()))
            .collect()
    }

    /// Encode a whole slice of records back-to-back.
    pub fn encode_all(records: &[StarRecord]) -> Vec<u8> {
        let mut out = Vec::with_capacity(records.len() * RECORD_SIZE);
        let mut buf = [0u8; RECORD_SIZE];
        for r in records {
            r.encode(&mut buf);
            out.extend_from_slice(&buf);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_fields() {
        let r = StarRecord {
            source_id: 2947050466531873024,
            ra: 101.287,
            dec: -16.716,
            g_mag: -1.46,
            bp_mag: -1.0,
            rp_mag: -2.0,
            g_mag_error: 0.001,
            bp_mag_error: 0.002,
            rp_mag_error: 0.003,
            parallax: 379.21,
            pmra: -546.01,
            pmdec: -1223.08,
            pmra_error: 0.05,
            pmdec_error: 0.05,
            ruwe: 1.05,
            bp_obs: 20,
            rp_obs: 21,
            healpix_pixel: 1234,
            designation: None,
        };
        let mut buf = [0u8; RECORD_SIZE];
        r.encode(&mut buf);
        let back = StarRecord::decode(&buf);
        assert_eq!(r, back);
        assert!((back.bp_rp() - (r.bp_mag - r.rp_mag)).abs() < f32::EPSILON);
    }

    #[test]
    fn record_size_is_80_bytes() {
        assert_eq!(std::mem::size_of::<[u8; RECORD_SIZE]>(), 80);
    }
}
