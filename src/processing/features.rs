//! Derived signal features
//!
//! - **VM**: vector magnitude `sqrt(x² + y² + z²)` (g)
//! - **ENMO**: Euclidean norm minus one, floored at zero (mg)
//! - **HPFVM**: high-pass filtered VM, rectified (mg)
//! - **PITCH / ROLL**: tilt angles (degrees)
//!
//! Only channels named in the statistics specification are derived, except
//! VM which every other magnitude feature is built from.

use tracing::info;

use super::{Butterworth, ProcessingError};
use crate::config::FeatureConfig;
use crate::types::{Channel, ChannelId, StatisticsSpec};

/// Features derived for one recording.
#[derive(Debug, Clone)]
pub struct Features {
    pub vm: Channel,
    pub enmo: Option<Channel>,
    pub hpfvm: Option<Channel>,
    pub pitch: Option<Channel>,
    pub roll: Option<Channel>,
}

impl Features {
    /// Every derived channel with its identifier, VM first.
    pub fn channels(&self) -> Vec<(ChannelId, &Channel)> {
        let mut out = vec![(ChannelId::Vm, &self.vm)];
        let optional = [
            (ChannelId::Enmo, &self.enmo),
            (ChannelId::Hpfvm, &self.hpfvm),
            (ChannelId::Pitch, &self.pitch),
            (ChannelId::Roll, &self.roll),
        ];
        out.extend(
            optional
                .into_iter()
                .filter_map(|(id, ch)| ch.as_ref().map(|c| (id, c))),
        );
        out
    }
}

fn check_aligned(x: &Channel, y: &Channel, z: &Channel) -> Result<(), ProcessingError> {
    if x.len() != y.len() || x.len() != z.len() {
        return Err(ProcessingError::ChannelMismatch(format!(
            "axis lengths differ: X={} Y={} Z={}",
            x.len(),
            y.len(),
            z.len()
        )));
    }
    Ok(())
}

/// Vector magnitude of three aligned axes.
pub fn vector_magnitude(x: &Channel, y: &Channel, z: &Channel) -> Result<Channel, ProcessingError> {
    check_aligned(x, y, z)?;
    let data = x
        .data
        .iter()
        .zip(&y.data)
        .zip(&z.data)
        .map(|((a, b), c)| (a * a + b * b + c * c).sqrt())
        .collect();
    Ok(x.derive(ChannelId::Vm.name(), data))
}

/// ENMO in milli-g: `max(VM - 1, 0) * 1000`.
pub fn enmo(vm: &Channel) -> Channel {
    let data = vm.data.iter().map(|v| (v - 1.0).max(0.0) * 1000.0).collect();
    vm.derive(ChannelId::Enmo.name(), data)
}

/// HPFVM in milli-g: `|highpass(VM)| * 1000`, zero-phase.
pub fn hpfvm(vm: &Channel, cfg: &FeatureConfig) -> Result<Channel, ProcessingError> {
    let filter = Butterworth::highpass(cfg.hpfvm_order, cfg.hpfvm_cutoff_hz, vm.frequency())?;
    let data = filter
        .filtfilt(&vm.data)
        .into_iter()
        .map(|v| v.abs() * 1000.0)
        .collect();
    Ok(vm.derive(ChannelId::Hpfvm.name(), data))
}

/// Pitch and roll in degrees.
///
/// `pitch = atan2(x, sqrt(y² + z²))`, `roll = atan2(y, sqrt(x² + z²))`.
pub fn pitch_roll(x: &Channel, y: &Channel, z: &Channel) -> Result<(Channel, Channel), ProcessingError> {
    check_aligned(x, y, z)?;
    let mut pitch = Vec::with_capacity(x.len());
    let mut roll = Vec::with_capacity(x.len());
    for ((&a, &b), &c) in x.data.iter().zip(&y.data).zip(&z.data) {
        pitch.push(a.atan2((b * b + c * c).sqrt()).to_degrees());
        roll.push(b.atan2((a * a + c * c).sqrt()).to_degrees());
    }
    Ok((
        x.derive(ChannelId::Pitch.name(), pitch),
        x.derive(ChannelId::Roll.name(), roll),
    ))
}

/// Derive the features requested by `spec` from calibrated axes.
pub fn derive_features(
    x: &Channel,
    y: &Channel,
    z: &Channel,
    spec: &StatisticsSpec,
    cfg: &FeatureConfig,
) -> Result<Features, ProcessingError> {
    let vm = vector_magnitude(x, y, z)?;

    let enmo_channel = spec.contains(ChannelId::Enmo).then(|| enmo(&vm));
    let hpfvm_channel = if spec.contains(ChannelId::Hpfvm) && vm.len() > 1 {
        Some(hpfvm(&vm, cfg)?)
    } else {
        None
    };
    let (pitch, roll) = if spec.contains(ChannelId::Pitch) && spec.contains(ChannelId::Roll) {
        let (p, r) = pitch_roll(x, y, z)?;
        (Some(p), Some(r))
    } else {
        (None, None)
    };

    let features = Features {
        vm,
        enmo: enmo_channel,
        hpfvm: hpfvm_channel,
        pitch,
        roll,
    };
    info!(
        samples = features.vm.len(),
        derived = ?features.channels().iter().map(|(id, _)| id.name()).collect::<Vec<_>>(),
        "Derived features"
    );
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelStatistics, GenericStat, StatRequest};
    use chrono::NaiveDate;

    fn ch(name: &str, data: Vec<f64>) -> Channel {
        let start = NaiveDate::from_ymd_opt(2020, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Channel::from_frequency(name, start, data, 50.0)
    }

    fn spec_for(ids: &[ChannelId]) -> StatisticsSpec {
        StatisticsSpec(
            ids.iter()
                .map(|&channel| ChannelStatistics {
                    channel,
                    requests: vec![StatRequest::Generic {
                        stats: vec![GenericStat::Mean],
                    }],
                })
                .collect(),
        )
    }

    #[test]
    fn test_vm_of_unit_axes() {
        let vm = vector_magnitude(
            &ch("X", vec![1.0, 0.0, 0.6]),
            &ch("Y", vec![0.0, 0.0, 0.8]),
            &ch("Z", vec![0.0, -1.0, 0.0]),
        )
        .unwrap();
        assert_eq!(vm.name, "VM");
        for v in vm.data {
            assert!((v - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_enmo_never_negative() {
        let vm = ch("VM", vec![0.0, 0.5, 1.0, 1.25, 3.0]);
        let e = enmo(&vm);
        assert!(e.data.iter().all(|&v| v >= 0.0));
        assert_eq!(e.data, vec![0.0, 0.0, 0.0, 250.0, 2000.0]);
    }

    #[test]
    fn test_vm_invariant_under_axis_permutation() {
        let a = vec![0.1, -0.9, 0.3];
        let b = vec![0.7, 0.2, -0.4];
        let c = vec![-0.5, 0.1, 0.9];
        let vm1 = vector_magnitude(&ch("X", a.clone()), &ch("Y", b.clone()), &ch("Z", c.clone())).unwrap();
        let vm2 = vector_magnitude(&ch("X", c), &ch("Y", a), &ch("Z", b)).unwrap();
        for (p, q) in vm1.data.iter().zip(&vm2.data) {
            assert!((p - q).abs() < 1e-12);
        }
    }

    #[test]
    fn test_pitch_roll_degrees() {
        let (pitch, roll) = pitch_roll(
            &ch("X", vec![1.0, 0.0]),
            &ch("Y", vec![0.0, 1.0]),
            &ch("Z", vec![0.0, 0.0]),
        )
        .unwrap();
        assert!((pitch.data[0] - 90.0).abs() < 1e-9);
        assert!(pitch.data[1].abs() < 1e-9);
        assert!((roll.data[1] - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_only_requested_features_are_derived() {
        let n = 500;
        let x = ch("X", vec![0.0; n]);
        let y = ch("Y", vec![0.0; n]);
        let z = ch("Z", vec![1.0; n]);

        let f = derive_features(&x, &y, &z, &spec_for(&[ChannelId::Enmo, ChannelId::Pitch]), &FeatureConfig::default()).unwrap();
        assert!(f.enmo.is_some());
        assert!(f.hpfvm.is_none());
        // Pitch alone is not enough; both tilt angles must be requested
        assert!(f.pitch.is_none() && f.roll.is_none());

        let f = derive_features(&x, &y, &z, &StatisticsSpec::default(), &FeatureConfig::default()).unwrap();
        assert_eq!(f.channels().len(), 5);
        let hp = f.hpfvm.unwrap();
        assert!(hp.data.iter().all(|v| *v < 1e-6), "static 1 g has no high-frequency content");
    }

    #[test]
    fn test_mismatched_axes_error() {
        let r = vector_magnitude(&ch("X", vec![1.0]), &ch("Y", vec![]), &ch("Z", vec![1.0]));
        assert!(matches!(r, Err(ProcessingError::ChannelMismatch(_))));
    }
}
