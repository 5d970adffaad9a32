//! Compute effect registry.
//!
//! Every effect follows one contract: read the scene's input texture (plus
//! optional history), run one compute dispatch, write the output texture.
//! The manager owns effect definitions, their compiled bytecode and their
//! history buffers, and turns an "execute" call into a [`DispatchPlan`] the
//! backend records. Shader compilation is pluggable through
//! [`ShaderCompiler`].

use super::{BufferAllocationRequest, GpuBuffer, GraphicsDeviceService};
use crate::error::DeviceError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bytes per history texel (RGBA32F).
pub const HISTORY_TEXEL_BYTES: u64 = 16;

/// Largest thread group a dispatch may declare.
pub const MAX_THREADS_PER_GROUP: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputeEffectType {
    Temporal,
    Denoising,
    #[serde(rename = "PostFX")]
    PostFx,
    Custom,
}

impl Default for ComputeEffectType {
    fn default() -> Self {
        ComputeEffectType::Custom
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBinding {
    pub name: String,
    pub slot: u32,
    pub is_input: bool,
}

/// Effect definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeShaderEffect {
    pub name: String,
    pub description: String,
    pub effect_type: ComputeEffectType,
    pub source: String,
    pub entry_point: String,
    pub thread_group: [u32; 3],
    pub bindings: Vec<TextureBinding>,
    pub enabled: bool,
    pub history_count: u32,
}

impl ComputeShaderEffect {
    /// Effect with the standard input (t0) and output (u0) bindings.
    pub fn new(name: impl Into<String>, effect_type: ComputeEffectType, source: impl Into<String>) -> Self {
        ComputeShaderEffect {
            name: name.into(),
            description: String::new(),
            effect_type,
            source: source.into(),
            entry_point: "main".to_string(),
            thread_group: [8, 8, 1],
            bindings: vec![
                TextureBinding {
                    name: "InputTexture".to_string(),
                    slot: 0,
                    is_input: true,
                },
                TextureBinding {
                    name: "OutputTexture".to_string(),
                    slot: 0,
                    is_input: false,
                },
            ],
            enabled: true,
            history_count: if effect_type == ComputeEffectType::Temporal { 1 } else { 0 },
        }
    }

    fn validate(&self) -> Result<(), DeviceError> {
        if self.name.trim().is_empty() {
            return Err(DeviceError::Effect("effect name must not be empty".to_string()));
        }
        let [x, y, z] = self.thread_group;
        let threads = x as u64 * y as u64 * z as u64;
        if threads == 0 || threads > MAX_THREADS_PER_GROUP as u64 {
            return Err(DeviceError::Effect(format!(
                "effect '{}' has invalid thread group {}x{}x{}",
                self.name, x, y, z
            )));
        }
        Ok(())
    }
}

/// Per-dispatch constants, laid out as four float4 registers:
/// `(time, beat, bar, bar_beat16) (width, height, 0, 0) (param0..3) (0, 0, 0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ComputeEffectParameters {
    pub time: f32,
    pub beat: f32,
    pub bar: f32,
    pub bar_beat16: f32,
    pub width: f32,
    pub height: f32,
    pub params: [f32; 4],
}

impl ComputeEffectParameters {
    pub const SIZE: usize = 64;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let values: [f32; 16] = [
            self.time,
            self.beat,
            self.bar,
            self.bar_beat16,
            self.width,
            self.height,
            0.0,
            0.0,
            self.params[0],
            self.params[1],
            self.params[2],
            self.params[3],
            0.0,
            0.0,
            0.0,
            0.0,
        ];
        let mut out = [0u8; Self::SIZE];
        for (chunk, value) in out.chunks_exact_mut(4).zip(values.iter()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }
}

/// Turns shader source into backend bytecode.
pub trait ShaderCompiler {
    fn compile(&self, source: &str, entry_point: &str, profile: &str) -> Result<Vec<u8>, String>;
}

/// What the backend records for one effect execution.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPlan {
    pub effect: String,
    pub groups: [u32; 3],
    pub constants: [u8; ComputeEffectParameters::SIZE],
    pub input_slots: Vec<u32>,
    pub output_slots: Vec<u32>,
    /// History buffer sampled this frame.
    pub history_read: Option<usize>,
    /// History buffer written this frame.
    pub history_write: Option<usize>,
}

/// Thread groups needed to cover `width x height`.
pub fn dispatch_groups(thread_group: [u32; 3], width: u32, height: u32) -> [u32; 3] {
    [
        width.div_ceil(thread_group[0].max(1)),
        height.div_ceil(thread_group[1].max(1)),
        1,
    ]
}

struct EffectSlot<B> {
    effect: ComputeShaderEffect,
    bytecode: Option<Vec<u8>>,
    last_error: Option<String>,
    history: Vec<B>,
    history_extent: (u32, u32),
    history_index: usize,
}

/// Registry of compute effects for one device.
pub struct ComputeEffectManager<S: GraphicsDeviceService> {
    slots: Vec<EffectSlot<S::Buffer>>,
    index: HashMap<String, usize>,
    profile: String,
}

impl<S: GraphicsDeviceService> ComputeEffectManager<S> {
    /// `profile` is the compiler target passed to [`ShaderCompiler::compile`].
    pub fn new(profile: impl Into<String>) -> Self {
        ComputeEffectManager {
            slots: Vec::new(),
            index: HashMap::new(),
            profile: profile.into(),
        }
    }

    pub fn add_effect(&mut self, effect: ComputeShaderEffect) -> Result<(), DeviceError> {
        effect.validate()?;
        if self.index.contains_key(&effect.name) {
            return Err(DeviceError::Effect(format!(
                "an effect named '{}' already exists",
                effect.name
            )));
        }
        self.index.insert(effect.name.clone(), self.slots.len());
        self.slots.push(EffectSlot {
            effect,
            bytecode: None,
            last_error: None,
            history: Vec::new(),
            history_extent: (0, 0),
            history_index: 0,
        });
        Ok(())
    }

    /// Remove an effect, releasing its history buffers.
    pub fn remove_effect(&mut self, name: &str) -> Option<ComputeShaderEffect> {
        let pos = self.index.remove(name)?;
        let slot = self.slots.remove(pos);
        for idx in self.index.values_mut() {
            if *idx > pos {
                *idx -= 1;
            }
        }
        Some(slot.effect)
    }

    pub fn get_effect(&self, name: &str) -> Option<&ComputeShaderEffect> {
        self.index.get(name).map(|&i| &self.slots[i].effect)
    }

    /// Mutable access; editing the definition drops the compiled bytecode.
    pub fn get_effect_mut(&mut self, name: &str) -> Option<&mut ComputeShaderEffect> {
        let i = *self.index.get(name)?;
        let slot = &mut self.slots[i];
        slot.bytecode = None;
        Some(&mut slot.effect)
    }

    pub fn effect_names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.effect.name.as_str()).collect()
    }

    pub fn is_compiled(&self, name: &str) -> bool {
        self.slot(name).map_or(false, |s| s.bytecode.is_some())
    }

    pub fn bytecode(&self, name: &str) -> Option<&[u8]> {
        self.slot(name).and_then(|s| s.bytecode.as_deref())
    }

    pub fn last_error(&self, name: &str) -> Option<&str> {
        self.slot(name).and_then(|s| s.last_error.as_deref())
    }

    fn slot(&self, name: &str) -> Option<&EffectSlot<S::Buffer>> {
        self.index.get(name).map(|&i| &self.slots[i])
    }

    fn slot_mut(&mut self, name: &str) -> Result<&mut EffectSlot<S::Buffer>, DeviceError> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| DeviceError::Effect(format!("no effect named '{}'", name)))?;
        Ok(&mut self.slots[i])
    }

    pub fn compile_effect(&mut self, name: &str, compiler: &dyn ShaderCompiler) -> Result<(), DeviceError> {
        let profile = self.profile.clone();
        let slot = self.slot_mut(name)?;
        match compiler.compile(&slot.effect.source, &slot.effect.entry_point, &profile) {
            Ok(bytecode) => {
                slot.bytecode = Some(bytecode);
                slot.last_error = None;
                Ok(())
            }
            Err(log) => {
                slot.bytecode = None;
                slot.last_error = Some(log.clone());
                Err(DeviceError::Effect(format!("compiling '{}' failed: {}", name, log)))
            }
        }
    }

    /// (Re)allocate the effect's history buffers for a `width x height`
    /// target. On failure the effect keeps no history buffers.
    pub fn allocate_history_buffers(
        &mut self,
        name: &str,
        device: &S,
        width: u32,
        height: u32,
    ) -> Result<(), DeviceError> {
        let slot = self.slot_mut(name)?;
        slot.history.clear();
        slot.history_extent = (0, 0);
        slot.history_index = 0;

        let count = slot.effect.history_count;
        if count == 0 {
            return Ok(());
        }
        let size = width as u64 * height as u64 * HISTORY_TEXEL_BYTES;
        let mut buffers = Vec::with_capacity(count as usize);
        for i in 0..count {
            let request = BufferAllocationRequest::storage(size)
                .with_label(format!("{}_history_{}", slot.effect.name, i));
            // partial allocations drop with `buffers`
            buffers.push(device.allocate_buffer(&request)?);
        }
        slot.history = buffers;
        slot.history_extent = (width, height);
        Ok(())
    }

    pub fn history_buffers(&self, name: &str) -> &[S::Buffer] {
        self.slot(name).map(|s| s.history.as_slice()).unwrap_or(&[])
    }

    /// Plan one execution and advance the history ring.
    pub fn execute_effect(
        &mut self,
        name: &str,
        params: &ComputeEffectParameters,
        width: u32,
        height: u32,
    ) -> Result<DispatchPlan, DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::Effect("dispatch extent must be non-zero".to_string()));
        }
        let slot = self.slot_mut(name)?;
        if !slot.effect.enabled {
            return Err(DeviceError::Effect(format!("effect '{}' is disabled", name)));
        }
        if slot.bytecode.is_none() {
            return Err(DeviceError::Effect(format!("effect '{}' is not compiled", name)));
        }

        let count = slot.effect.history_count as usize;
        let (history_read, history_write) = if count > 0 {
            if slot.history.len() != count || slot.history_extent != (width, height) {
                return Err(DeviceError::Effect(format!(
                    "history buffers of '{}' are not allocated for {}x{}",
                    name, width, height
                )));
            }
            let expected = width as u64 * height as u64 * HISTORY_TEXEL_BYTES;
            debug_assert!(slot.history.iter().all(|b| b.size_bytes() == expected));
            let read = slot.history_index;
            let write = (read + 1) % count;
            slot.history_index = write;
            (Some(read), Some(write))
        } else {
            (None, None)
        };

        let mut constants = *params;
        constants.width = width as f32;
        constants.height = height as f32;

        Ok(DispatchPlan {
            effect: name.to_string(),
            groups: dispatch_groups(slot.effect.thread_group, width, height),
            constants: constants.to_bytes(),
            input_slots: slot
                .effect
                .bindings
                .iter()
                .filter(|b| b.is_input)
                .map(|b| b.slot)
                .collect(),
            output_slots: slot
                .effect
                .bindings
                .iter()
                .filter(|b| !b.is_input)
                .map(|b| b.slot)
                .collect(),
            history_read,
            history_write,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::headless::HeadlessDeviceService;
    use proptest::prelude::*;

    struct EchoCompiler;

    impl ShaderCompiler for EchoCompiler {
        fn compile(&self, source: &str, _entry: &str, _profile: &str) -> Result<Vec<u8>, String> {
            if source.contains("syntax error") {
                Err("line 1: syntax error".to_string())
            } else {
                Ok(source.as_bytes().to_vec())
            }
        }
    }

    fn manager() -> ComputeEffectManager<HeadlessDeviceService> {
        ComputeEffectManager::new("cs_5_0")
    }

    #[test]
    fn test_add_remove_get() {
        let mut m = manager();
        m.add_effect(ComputeShaderEffect::new("blur", ComputeEffectType::PostFx, "src")).unwrap();
        m.add_effect(ComputeShaderEffect::new("trail", ComputeEffectType::Temporal, "src")).unwrap();
        assert!(m
            .add_effect(ComputeShaderEffect::new("blur", ComputeEffectType::Custom, "src"))
            .is_err());
        assert_eq!(m.effect_names(), vec!["blur", "trail"]);

        assert!(m.remove_effect("blur").is_some());
        assert!(m.get_effect("blur").is_none());
        assert_eq!(m.get_effect("trail").unwrap().history_count, 1);
        assert!(m.remove_effect("blur").is_none());
    }

    #[test]
    fn test_compile_failure_is_recorded() {
        let mut m = manager();
        m.add_effect(ComputeShaderEffect::new("bad", ComputeEffectType::Custom, "syntax error"))
            .unwrap();
        assert!(m.compile_effect("bad", &EchoCompiler).is_err());
        assert_eq!(m.last_error("bad"), Some("line 1: syntax error"));
        assert!(!m.is_compiled("bad"));
    }

    #[test]
    fn test_execute_requires_compile() {
        let mut m = manager();
        m.add_effect(ComputeShaderEffect::new("fx", ComputeEffectType::PostFx, "ok")).unwrap();
        let params = ComputeEffectParameters::default();
        assert!(m.execute_effect("fx", &params, 64, 64).is_err());

        m.compile_effect("fx", &EchoCompiler).unwrap();
        let plan = m.execute_effect("fx", &params, 100, 30).unwrap();
        assert_eq!(plan.groups, [13, 4, 1]);
        assert_eq!(plan.input_slots, vec![0]);
        assert_eq!(plan.output_slots, vec![0]);
        assert_eq!(plan.history_read, None);

        m.get_effect_mut("fx").unwrap().thread_group = [16, 16, 1];
        assert!(!m.is_compiled("fx"));
    }

    #[test]
    fn test_history_ping_pong() {
        let device = HeadlessDeviceService::new(1 << 24);
        let mut m = manager();
        let mut effect = ComputeShaderEffect::new("trail", ComputeEffectType::Temporal, "ok");
        effect.history_count = 2;
        m.add_effect(effect).unwrap();
        m.compile_effect("trail", &EchoCompiler).unwrap();

        let params = ComputeEffectParameters::default();
        assert!(m.execute_effect("trail", &params, 32, 32).is_err());

        m.allocate_history_buffers("trail", &device, 32, 32).unwrap();
        assert_eq!(m.history_buffers("trail").len(), 2);
        assert_eq!(device.used_bytes(), 2 * 32 * 32 * HISTORY_TEXEL_BYTES);

        let first = m.execute_effect("trail", &params, 32, 32).unwrap();
        let second = m.execute_effect("trail", &params, 32, 32).unwrap();
        assert_eq!((first.history_read, first.history_write), (Some(0), Some(1)));
        assert_eq!((second.history_read, second.history_write), (Some(1), Some(0)));

        // resized target needs fresh history
        assert!(m.execute_effect("trail", &params, 64, 32).is_err());
    }

    #[test]
    fn test_failed_history_allocation_leaves_nothing() {
        let device = HeadlessDeviceService::new(32 * 32 * HISTORY_TEXEL_BYTES);
        let mut m = manager();
        let mut effect = ComputeShaderEffect::new("trail", ComputeEffectType::Temporal, "ok");
        effect.history_count = 2;
        m.add_effect(effect).unwrap();

        let err = m.allocate_history_buffers("trail", &device, 32, 32).unwrap_err();
        assert!(matches!(err, DeviceError::OutOfMemory { .. }));
        assert!(m.history_buffers("trail").is_empty());
        assert_eq!(device.used_bytes(), 0);
    }

    #[test]
    fn test_parameter_layout() {
        let params = ComputeEffectParameters {
            time: 1.5,
            params: [0.0, 0.0, 0.0, 2.0],
            ..ComputeEffectParameters::default()
        };
        let bytes = params.to_bytes();
        assert_eq!(&bytes[0..4], &1.5f32.to_le_bytes());
        assert_eq!(&bytes[44..48], &2.0f32.to_le_bytes());
        assert!(bytes[48..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_dispatch_groups_at_extent_limits() {
        assert_eq!(dispatch_groups([8, 8, 1], u32::MAX, 16), [536_870_912, 2, 1]);
        assert_eq!(dispatch_groups([1, 1, 1], u32::MAX, u32::MAX), [u32::MAX, u32::MAX, 1]);
        assert_eq!(dispatch_groups([0, 0, 1], 7, 0), [7, 0, 1]);
    }

    proptest! {
        #[test]
        fn prop_dispatch_covers_extent(w in 1u32..4096, h in 1u32..4096, tx in 1u32..33, ty in 1u32..33) {
            let [gx, gy, gz] = dispatch_groups([tx, ty, 1], w, h);
            prop_assert!(gx * tx >= w && (gx - 1) * tx < w);
            prop_assert!(gy * ty >= h && (gy - 1) * ty < h);
            prop_assert_eq!(gz, 1);
        }
    }
}
