//! Live transform parameters shared between the controller, the governor and
//! the transform loop.

use crate::defaults;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;

/// One consistent set of parameters, read by the transform stage once per frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformParameters {
    /// Pitch shift in semitones.
    pub pitch_shift: f32,
    /// Formant shift factor (1.0 = unchanged).
    pub formant_shift: f32,
    /// Wet/dry blend applied by the model path.
    pub intensity: f32,
    /// When set the model is bypassed and only the lightweight shifter runs.
    pub fallback_active: bool,
    /// Incremented on every update.
    pub version: u64,
}

impl TransformParameters {
    pub fn new(pitch_shift: f32, formant_shift: f32, intensity: f32) -> Self {
        Self {
            pitch_shift,
            formant_shift,
            intensity,
            fallback_active: false,
            version: 0,
        }
    }
}

impl Default for TransformParameters {
    fn default() -> Self {
        Self::new(
            defaults::PITCH_SHIFT,
            defaults::FORMANT_SHIFT,
            defaults::INTENSITY,
        )
    }
}

/// Atomically replaced parameter record.
///
/// Writers never mutate the published value; they build a copy, bump the
/// version and swap it in, so a reader holding a snapshot sees every field
/// from the same update.
pub struct ParameterStore {
    current: ArcSwap<TransformParameters>,
}

impl ParameterStore {
    pub fn new(initial: TransformParameters) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<TransformParameters> {
        self.current.load_full()
    }

    /// Applies `change` to a copy of the current parameters and publishes it.
    ///
    /// Concurrent writers are serialised by retrying against the latest value,
    /// so an update from the governor never overwrites a user change made at
    /// the same moment (or vice versa).
    pub fn update<F>(&self, mut change: F) -> Arc<TransformParameters>
    where
        F: FnMut(&mut TransformParameters),
    {
        let mut published = None;
        self.current.rcu(|current| {
            let mut next = TransformParameters::clone(current);
            change(&mut next);
            next.version = current.version + 1;
            let next = Arc::new(next);
            published = Some(next.clone());
            next
        });
        published.unwrap_or_else(|| self.snapshot())
    }

    pub fn set_pitch(&self, semitones: f32) -> Arc<TransformParameters> {
        self.update(|p| p.pitch_shift = semitones)
    }

    pub fn set_formant(&self, factor: f32) -> Arc<TransformParameters> {
        self.update(|p| p.formant_shift = factor)
    }

    pub fn set_intensity(&self, intensity: f32) -> Arc<TransformParameters> {
        self.update(|p| p.intensity = intensity)
    }

    /// Sets the fallback flag. Returns true if the flag changed.
    pub fn set_fallback(&self, active: bool) -> bool {
        if self.current.load().fallback_active == active {
            return false;
        }
        let mut changed = false;
        self.update(|p| {
            changed = p.fallback_active != active;
            p.fallback_active = active;
        });
        changed
    }

    pub fn fallback_active(&self) -> bool {
        self.current.load().fallback_active
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(TransformParameters::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_update_bumps_version_and_keeps_other_fields() {
        let store = ParameterStore::default();
        let before = store.snapshot();

        let after = store.set_pitch(7.0);
        assert_eq!(after.pitch_shift, 7.0);
        assert_eq!(after.formant_shift, before.formant_shift);
        assert_eq!(after.intensity, before.intensity);
        assert_eq!(after.version, before.version + 1);
        assert_eq!(*store.snapshot(), *after);
    }

    #[test]
    fn test_snapshot_is_not_affected_by_later_updates() {
        let store = ParameterStore::default();
        let held = store.snapshot();
        store.set_formant(1.8);
        assert_eq!(held.formant_shift, defaults::FORMANT_SHIFT);
        assert_eq!(store.snapshot().formant_shift, 1.8);
    }

    #[test]
    fn test_set_fallback_reports_change() {
        let store = ParameterStore::default();
        assert!(store.set_fallback(true));
        assert!(!store.set_fallback(true), "already set");
        assert!(store.fallback_active());
        assert!(store.set_fallback(false));
        assert!(!store.fallback_active());
    }

    #[test]
    fn test_concurrent_writers_never_lose_updates() {
        let store = Arc::new(ParameterStore::default());
        let start_version = store.snapshot().version;

        let user = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    store.set_pitch(i as f32 / 10.0);
                }
            })
        };
        let governor = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    store.set_fallback(i % 2 == 0);
                }
            })
        };
        user.join().unwrap();
        governor.join().unwrap();

        let last = store.snapshot();
        assert_eq!(last.pitch_shift, 19.9, "last user write survives");
        assert!(last.version >= start_version + 200);
    }

    #[test]
    fn test_reader_sees_paired_fields_from_one_update() {
        let store = Arc::new(ParameterStore::new(TransformParameters::new(0.0, 1.0, 0.5)));
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 1..=500 {
                    let v = i as f32;
                    store.update(|p| {
                        p.pitch_shift = v;
                        p.intensity = v;
                    });
                }
            })
        };
        for _ in 0..2000 {
            let snap = store.snapshot();
            if snap.version > 0 {
                assert_eq!(snap.pitch_shift, snap.intensity, "torn parameter snapshot");
            }
        }
        writer.join().unwrap();
    }
}
