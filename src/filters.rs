//! Audio filter records and preset composition.
//!
//! A [`Filters`] value is the exact JSON the node expects under the
//! `filters` key of a player update; `None` fields are omitted so the node
//! leaves those filters untouched. [`FilterBuilder`] layers presets and
//! hand-set filters into one record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::validate;
use crate::Result;

/// Composable audio filter record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filters {
    /// Volume multiplier, `0.0..=5.0`. Distinct from player volume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    /// Up to fifteen bands; omitted bands keep their current gain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Vec<EqualizerBand>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<Karaoke>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<Timescale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<Tremolo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<Vibrato>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<Distortion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_mix: Option<ChannelMix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_pass: Option<LowPass>,
    /// Filters provided by node plugins, keyed by plugin filter name.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub plugin_filters: HashMap<String, HashMap<String, Value>>,
}

impl Filters {
    /// The canonical empty record; sending it resets every filter.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EqualizerBand {
    /// Band index, 0 (25 Hz) through 14 (16 kHz).
    pub band: u8,
    /// Gain, `-0.25` (muted) through `1.0`.
    pub gain: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Karaoke {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mono_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_band: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_width: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timescale {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tremolo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Vibrato {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rotation {
    /// Rotation speed in Hz; 0.2 gives the classic "8D" sweep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_hz: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Distortion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sin_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sin_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tan_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tan_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelMix {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_to_left: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_to_right: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_to_left: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_to_right: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LowPass {
    /// Higher smoothing cuts more high end; 1.0 disables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing: Option<f64>,
}

/// Bass boost preset strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BassBoost {
    Low,
    Medium,
    High,
}

/// Chainable builder composing presets into one [`Filters`] record.
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    filters: Filters,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter volume multiplier.
    pub fn volume(mut self, volume: f64) -> Result<Self> {
        validate::validate_filter_volume(volume)?;
        self.filters.volume = Some(volume);
        Ok(self)
    }

    /// Replace the equalizer bands.
    pub fn equalizer(mut self, bands: Vec<EqualizerBand>) -> Result<Self> {
        for band in &bands {
            validate::validate_equalizer_band(band.band, band.gain)?;
        }
        self.filters.equalizer = Some(bands);
        Ok(self)
    }

    /// Boost the three lowest bands.
    pub fn bass_boost(mut self, level: BassBoost) -> Self {
        let gain = match level {
            BassBoost::Low => 0.1,
            BassBoost::Medium => 0.15,
            BassBoost::High => 0.25,
        };
        let bands = (0..3)
            .map(|band| EqualizerBand { band, gain })
            .collect();
        self.filters.equalizer = Some(bands);
        self
    }

    /// Speed and pitch up 20%.
    pub fn nightcore(mut self) -> Self {
        self.filters.timescale = Some(Timescale {
            speed: Some(1.2),
            pitch: Some(1.2),
            rate: Some(1.0),
        });
        self
    }

    /// Slow and pitch down 20%.
    pub fn vaporwave(mut self) -> Self {
        self.filters.timescale = Some(Timescale {
            speed: Some(0.8),
            pitch: Some(0.8),
            rate: Some(1.0),
        });
        self
    }

    /// Rotate the stereo field slowly around the listener.
    pub fn eight_d(mut self) -> Self {
        self.filters.rotation = Some(Rotation {
            rotation_hz: Some(0.2),
        });
        self
    }

    /// Suppress the lead vocal band.
    pub fn karaoke(mut self) -> Self {
        self.filters.karaoke = Some(Karaoke {
            level: Some(1.0),
            mono_level: Some(1.0),
            filter_band: Some(220.0),
            filter_width: Some(100.0),
        });
        self
    }

    pub fn tremolo(mut self) -> Self {
        self.filters.tremolo = Some(Tremolo {
            frequency: Some(2.0),
            depth: Some(0.5),
        });
        self
    }

    pub fn vibrato(mut self) -> Self {
        self.filters.vibrato = Some(Vibrato {
            frequency: Some(2.0),
            depth: Some(0.5),
        });
        self
    }

    pub fn low_pass(mut self) -> Self {
        self.filters.low_pass = Some(LowPass {
            smoothing: Some(20.0),
        });
        self
    }

    /// Set a custom timescale.
    pub fn timescale(mut self, speed: f64, pitch: f64, rate: f64) -> Result<Self> {
        validate::validate_timescale(speed, pitch, rate)?;
        self.filters.timescale = Some(Timescale {
            speed: Some(speed),
            pitch: Some(pitch),
            rate: Some(rate),
        });
        Ok(self)
    }

    /// Attach a plugin-provided filter.
    pub fn plugin_filter(
        mut self,
        name: impl Into<String>,
        values: HashMap<String, Value>,
    ) -> Self {
        self.filters.plugin_filters.insert(name.into(), values);
        self
    }

    pub fn build(self) -> Filters {
        self.filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_serialize_to_empty_object() {
        let json = serde_json::to_value(Filters::empty()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn presets_compose() {
        let filters = FilterBuilder::new()
            .bass_boost(BassBoost::High)
            .nightcore()
            .eight_d()
            .build();
        assert_eq!(filters.equalizer.as_ref().unwrap().len(), 3);
        assert_eq!(filters.timescale.unwrap().speed, Some(1.2));
        assert_eq!(filters.rotation.unwrap().rotation_hz, Some(0.2));
        assert!(filters.karaoke.is_none());
    }

    #[test]
    fn volume_validation() {
        assert!(FilterBuilder::new().volume(2.5).is_ok());
        assert!(FilterBuilder::new().volume(5.5).is_err());
        assert!(FilterBuilder::new().volume(-0.1).is_err());
    }

    #[test]
    fn equalizer_validation() {
        let ok = vec![EqualizerBand { band: 14, gain: 1.0 }];
        assert!(FilterBuilder::new().equalizer(ok).is_ok());
        let bad = vec![EqualizerBand { band: 15, gain: 0.0 }];
        assert!(FilterBuilder::new().equalizer(bad).is_err());
    }

    #[test]
    fn serialization_uses_camel_case() {
        let filters = FilterBuilder::new().eight_d().low_pass().build();
        let json = serde_json::to_value(&filters).unwrap();
        assert_eq!(json["rotation"]["rotationHz"], 0.2);
        assert_eq!(json["lowPass"]["smoothing"], 20.0);
    }
}
