//! Recorded reference values for the J1302 field.
//!
//! `ONAXIS` values are ground truth from a pointed on-axis observation.
//! `CASA613` values were measured on images made with CASA 6.1.3.

use crate::context::RuntimeBaseline;

/// Peak flux density of the tt0 and tt1 images and of the spectral index image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaylorReference {
    pub provenance: &'static str,
    pub tt0: f64,
    pub tt1: f64,
    pub alpha: f64,
}

pub const ONAXIS: TaylorReference = TaylorReference {
    provenance: "on-axis",
    tt0: 0.3337,
    tt1: -0.01588,
    alpha: -0.0476,
};

pub const MOSAIC_CASA613: TaylorReference = TaylorReference {
    provenance: "6.1.3 image",
    tt0: 0.3198292,
    tt1: 0.01994022,
    alpha: 0.06234646,
};

pub const AWPROJECT_CASA613: TaylorReference = TaylorReference {
    provenance: "6.1.3 image",
    tt0: 0.3174496,
    tt1: -0.01514572,
    alpha: -0.04771062,
};

/// Restoring beams `[major, minor, pa]` of the 6.1.3 images
pub const MOSAIC_BEAM_CASA613: [f64; 3] = [3.1565470695495605, 2.58677792549133, 11.282347679138184];
pub const AWPROJECT_BEAM_CASA613: [f64; 3] = [3.07221413, 2.49312615, 11.04310322];
pub const QL_BEAM_CASA613: [f64; 3] = [3.16884375, 2.59194756, 11.36847878];

pub const QL_FLUX_ONAXIS: f64 = 0.3337;
pub const QL_FLUX_CASA613: f64 = 0.320879;

/// Fitted `(F_nu0, alpha)` at 3.0 GHz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitReference {
    pub provenance: &'static str,
    pub f_nu0: f64,
    pub alpha: f64,
}

pub const CUBE_FIT_ONAXIS: FitReference = FitReference {
    provenance: "on-axis",
    f_nu0: 0.3337,
    alpha: -0.0476,
};

pub const CUBE_FIT_CASA613: FitReference = FitReference {
    provenance: "6.1.3 image",
    f_nu0: 0.3127,
    alpha: 0.04134,
};

/// Reference frequency of the cube fit, GHz
pub const CUBE_NU0_GHZ: f64 = 3.0;

/// Per spectral window Stokes peaks, residual noise and PSF beam.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpwReference {
    pub spw: &'static str,
    pub freq_ghz: f64,
    pub iquv: [f64; 4],
    pub rms_iquv: [f64; 4],
    pub beam: [f64; 3],
}

pub const CUBE_SPW_CASA613: [SpwReference; 3] = [
    SpwReference {
        spw: "2",
        freq_ghz: 2.028,
        iquv: [0.3024486, -0.00169682, -0.00040808, -0.00172231],
        rms_iquv: [0.00058096, 0.00053226, 0.00052702, 0.00055715],
        beam: [4.63033438, 3.7626121, 8.42547607],
    },
    SpwReference {
        spw: "8",
        freq_ghz: 2.796,
        iquv: [3.24606597e-01, -1.02521779e-04, -2.74724560e-04, -9.82215162e-04],
        rms_iquv: [0.00060875, 0.00056557, 0.00056437, 0.00058742],
        beam: [3.31582212, 2.81106067, 12.23698997],
    },
    SpwReference {
        spw: "14",
        freq_ghz: 3.564,
        iquv: [0.30785725, 0.00112553, -0.00233958, -0.00072553],
        rms_iquv: [0.00120004, 0.00096465, 0.00095693, 0.00094171],
        beam: [2.06845379, 1.62075114, 8.15380859],
    },
];

pub const CUBE_SPW_ONAXIS: [SpwReference; 3] = [
    SpwReference {
        spw: "2",
        freq_ghz: 2.028,
        iquv: [3.09755385e-01, -1.39351614e-04, -1.01510414e-04, 3.48565959e-06],
        rms_iquv: [9.06101077e-05, 6.18512027e-05, 6.08855185e-05, 6.16381383e-05],
        beam: [4.39902544, 2.97761726, -1.9803896],
    },
    SpwReference {
        spw: "8",
        freq_ghz: 2.796,
        iquv: [3.33031625e-01, -1.70329688e-04, -5.54503786e-05, 1.51384829e-05],
        rms_iquv: [6.83661207e-05, 5.41465193e-05, 5.37294874e-05, 5.48078784e-05],
        beam: [3.17962098, 2.23836327, -3.84393311],
    },
    SpwReference {
        spw: "14",
        freq_ghz: 3.564,
        iquv: [3.26020330e-01, -1.19368524e-04, 1.94136555e-05, -3.02872763e-06],
        rms_iquv: [6.07943859e-05, 4.44997526e-05, 4.54793500e-05, 4.45020873e-05],
        beam: [2.4293716, 1.61365998, -3.72186279],
    },
];

/// Reference frequency each VLASS spectral window is imaged at.
pub const SPW_REFFREQ: [(&str, &str); 16] = [
    ("2", "2.028GHz"),
    ("3", "2.156GHz"),
    ("4", "2.284GHz"),
    ("5", "2.412GHz"),
    ("6", "2.540GHz"),
    ("7", "2.668GHz"),
    ("8", "2.796GHz"),
    ("9", "2.924GHz"),
    ("10", "3.052GHz"),
    ("11", "3.180GHz"),
    ("12", "3.308GHz"),
    ("13", "3.436GHz"),
    ("14", "3.564GHz"),
    ("15", "3.692GHz"),
    ("16", "3.820GHz"),
    ("17", "3.948GHz"),
];

pub fn spw_reffreq(spw: &str) -> Option<&'static str> {
    SPW_REFFREQ.iter().find(|(s, _)| *s == spw).map(|(_, f)| *f)
}

/// Reference frequency of `spw` in GHz.
pub fn spw_freq_ghz(spw: &str) -> Option<f64> {
    spw_reffreq(spw)?.strip_suffix("GHz")?.parse().ok()
}

pub fn spw_reference<'a>(table: &'a [SpwReference], spw: &str) -> Option<&'a SpwReference> {
    table.iter().find(|r| r.spw == spw)
}

/// Wall time of the J1302 tests with CASA 6.1.3
pub const J1302_RUNTIME: RuntimeBaseline = RuntimeBaseline {
    label: "6.1.3 runtime",
    serial_secs: 1543.0,
    parallel_secs: None,
};
