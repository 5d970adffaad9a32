//! Micro demo payloads.
//!
//! Micro builds trade readability for bytes. Scene, post effect and
//! transition shaders become minified "modules" with renamed entry points,
//! and the timeline moves out of `project.json` into a compact binary track:
//!
//! ```text
//! header (14 bytes)   "TKR3" | bpm Q8 u16 | length beats u16 | row count u16
//!                     | scene count u16 | transition slot count u8 (6) | reserved u8
//! transition slots    6 x i16 module index (-1 = unused)
//! per scene           i16 module index | u16 post fx count | count x i16 module index
//! per row (9 bytes)   i16 id | i16 scene | u8 transition | u8 flags (bit 0 = stop)
//!                     | u8 duration Q4 | i8 offset Q4 | i8 music
//! ```
//!
//! All integers are little endian. The modules blob is `U:<len>\n` followed by
//! the modules, one per line, in module index order.

use super::{Project, Track};

pub const TRACK_MAGIC: &[u8; 4] = b"TKR3";
pub const TRACK_HEADER_LEN: usize = 14;
pub const TRACK_ROW_LEN: usize = 9;
pub const TRANSITION_SLOTS: usize = 6;

/// Built-in transitions. Discriminants are the values stored in track rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    None = 0,
    Crossfade = 1,
    DipToBlack = 2,
    FadeOut = 3,
    FadeIn = 4,
    Glitch = 5,
    Pixelate = 6,
}

impl TransitionKind {
    const SLOTTED: [TransitionKind; TRANSITION_SLOTS] = [
        TransitionKind::Crossfade,
        TransitionKind::DipToBlack,
        TransitionKind::FadeOut,
        TransitionKind::FadeIn,
        TransitionKind::Glitch,
        TransitionKind::Pixelate,
    ];

    /// Match a transition preset stem such as `dip_to_black` or `Glitch`.
    /// Custom presets have no built-in shader and map to `None`.
    pub fn from_stem(stem: &str) -> TransitionKind {
        let key: String = stem
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "crossfade" | "fade" | "fadeab" => TransitionKind::Crossfade,
            "diptoblack" | "dip" => TransitionKind::DipToBlack,
            "fadeout" => TransitionKind::FadeOut,
            "fadein" => TransitionKind::FadeIn,
            "glitch" => TransitionKind::Glitch,
            "pixelate" => TransitionKind::Pixelate,
            _ => TransitionKind::None,
        }
    }

    fn slot(self) -> Option<usize> {
        Self::SLOTTED.iter().position(|k| *k == self)
    }

    /// Fades share the crossfade shader.
    fn source(self) -> &'static str {
        match self {
            TransitionKind::DipToBlack => DIP_TO_BLACK,
            TransitionKind::Glitch => GLITCH,
            TransitionKind::Pixelate => PIXELATE,
            _ => CROSSFADE,
        }
    }
}

const TRANSITION_PRELUDE: &str = "
float4 main(float2 fragCoord, float2 iResolution, float iTime) {
    float2 uv = fragCoord / iResolution;
    float t = saturate(iTime);
    float4 colA = iChannel0.Sample(iSampler0, uv);
    float4 colB = iChannel1.Sample(iSampler1, uv);
";

const CROSSFADE: &str = "    return lerp(colA, colB, t);
}
";

const DIP_TO_BLACK: &str = "    float4 black = float4(0, 0, 0, 1);
    return (t < 0.5) ? lerp(colA, black, t * 2.0) : lerp(black, colB, (t - 0.5) * 2.0);
}
";

const GLITCH: &str = "    float band = frac(sin(dot(float2(floor(uv.y * 20.0) + iTime * 10.0, iTime), float2(12.9898, 78.233))) * 43758.5453);
    float2 shifted = uv + float2((band - 0.5) * 0.1 * sin(t * 3.14159), 0);
    return lerp(iChannel0.Sample(iSampler0, shifted), iChannel1.Sample(iSampler1, shifted), t);
}
";

const PIXELATE: &str = "    float cells = 50.0 * (1.0 - sin(t * 3.14159)) + 1.0;
    float2 snapped = floor(uv * cells) / cells;
    return lerp(iChannel0.Sample(iSampler0, snapped), iChannel1.Sample(iSampler1, snapped), t);
}
";

/// Strip `//` and `/* */` comments, collapse whitespace runs to one space
/// and trim.
pub fn minify_shader(input: &str) -> String {
    let mut stripped = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        match (ch, chars.peek()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        stripped.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                // keep tokens on either side of the comment apart
                stripped.push(' ');
            }
            _ => stripped.push(ch),
        }
    }

    let mut out = String::with_capacity(stripped.len());
    let mut prev_space = false;
    for ch in stripped.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

const RETURN_TYPES: [&str; 3] = ["float4", "half4", "fixed4"];

fn declares(source: &str, name: &str) -> Option<(usize, usize)> {
    RETURN_TYPES.iter().find_map(|ty| {
        [format!("{} {}(", ty, name), format!("{} {} (", ty, name)]
            .iter()
            .find_map(|sig| source.find(sig.as_str()))
            .map(|pos| (pos + ty.len() + 1, name.len()))
    })
}

/// Rename the module's `main` to `entry`. Sources without a usable entry
/// function get a magenta fallback so the module still links.
pub fn remap_entry_point(source: &str, entry: &str) -> String {
    if declares(source, entry).is_some() {
        return source.to_string();
    }
    if let Some((start, len)) = declares(source, "main") {
        let mut out = source.to_string();
        out.replace_range(start..start + len, entry);
        return out;
    }
    format!(
        "{}\nfloat4 {}(float2 fragCoord, float2 iResolution, float iTime){{ return float4(1.0, 0.0, 1.0, 1.0); }}\n",
        source, entry
    )
}

/// Minified shader modules and where each project item landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMap {
    pub modules: Vec<String>,
    pub entry_points: Vec<String>,
    pub scene_modules: Vec<i16>,
    /// Per scene, one slot per post effect (-1 when disabled or empty).
    pub postfx_modules: Vec<Vec<i16>>,
    pub transition_modules: [i16; TRANSITION_SLOTS],
}

impl ModuleMap {
    /// Transitions used by the track come first, then each scene followed by
    /// its enabled post effects. Entry points are `t<n>`, `s<scene>` and
    /// `p<n>`.
    pub fn build(project: &Project) -> ModuleMap {
        let mut map = ModuleMap {
            modules: Vec::new(),
            entry_points: Vec::new(),
            scene_modules: Vec::with_capacity(project.scenes.len()),
            postfx_modules: Vec::with_capacity(project.scenes.len()),
            transition_modules: [-1; TRANSITION_SLOTS],
        };

        let mut used = [false; TRANSITION_SLOTS];
        for row in &project.track.rows {
            if let Some(slot) = TransitionKind::from_stem(&row.trans_stem).slot() {
                used[slot] = true;
            }
        }
        let mut next_transition = 0;
        for (slot, kind) in TransitionKind::SLOTTED.iter().enumerate() {
            if !used[slot] {
                continue;
            }
            let source = format!("{}{}", TRANSITION_PRELUDE, kind.source());
            map.transition_modules[slot] = map.push(&source, format!("t{}", next_transition));
            next_transition += 1;
        }

        let mut next_postfx = 0;
        for (i, scene) in project.scenes.iter().enumerate() {
            let code = scene.code.as_deref().unwrap_or_default();
            let module = map.push(code, format!("s{}", i));
            map.scene_modules.push(module);

            let mut fx_modules = vec![-1; scene.postfx.len()];
            for (j, fx) in scene.postfx.iter().enumerate().filter(|(_, fx)| fx.enabled) {
                fx_modules[j] = map.push(fx.code.as_deref().unwrap_or_default(), format!("p{}", next_postfx));
                next_postfx += 1;
            }
            map.postfx_modules.push(fx_modules);
        }
        map
    }

    fn push(&mut self, source: &str, entry: String) -> i16 {
        if source.trim().is_empty() {
            return -1;
        }
        let compact = minify_shader(&remap_entry_point(source, &entry));
        if compact.is_empty() {
            return -1;
        }
        let id = self.modules.len().min(i16::MAX as usize) as i16;
        self.modules.push(compact);
        self.entry_points.push(entry);
        id
    }

    /// `U:<len>\n` followed by every module on its own line.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut body = String::new();
        for module in &self.modules {
            body.push_str(module);
            body.push('\n');
        }
        format!("U:{}\n{}", body.len(), body).into_bytes()
    }
}

fn clamp_u16(value: usize) -> u16 {
    value.min(u16::MAX as usize) as u16
}

/// Encode the project's timeline against `modules`.
pub fn compact_track(project: &Project, modules: &ModuleMap) -> Vec<u8> {
    let track: &Track = &project.track;
    let rows = &track.rows[..clamp_u16(track.rows.len()) as usize];
    let scene_count = clamp_u16(project.scenes.len());
    let fx_slots: usize = modules.postfx_modules.iter().map(Vec::len).sum();

    let mut out = Vec::with_capacity(
        TRACK_HEADER_LEN
            + TRANSITION_SLOTS * 2
            + project.scenes.len() * 4
            + fx_slots * 2
            + rows.len() * TRACK_ROW_LEN,
    );
    out.extend_from_slice(TRACK_MAGIC);
    out.extend_from_slice(&((track.bpm * 256.0).clamp(0.0, 65535.0) as u16).to_le_bytes());
    out.extend_from_slice(&(track.len.min(u16::MAX as u32) as u16).to_le_bytes());
    out.extend_from_slice(&(rows.len() as u16).to_le_bytes());
    out.extend_from_slice(&scene_count.to_le_bytes());
    out.push(TRANSITION_SLOTS as u8);
    out.push(0);

    for module in modules.transition_modules {
        out.extend_from_slice(&module.to_le_bytes());
    }

    for scene in 0..scene_count as usize {
        let module = modules.scene_modules.get(scene).copied().unwrap_or(-1);
        out.extend_from_slice(&module.to_le_bytes());
        let fx = modules.postfx_modules.get(scene).map(Vec::as_slice).unwrap_or_default();
        let fx = &fx[..clamp_u16(fx.len()) as usize];
        out.extend_from_slice(&(fx.len() as u16).to_le_bytes());
        for module in fx {
            out.extend_from_slice(&module.to_le_bytes());
        }
    }

    for row in rows {
        let id = row.id.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        let scene = row.scene.clamp(-1, i16::MAX as i32) as i16;
        let transition = TransitionKind::from_stem(&row.trans_stem) as u8;
        let flags = if row.stop { 1u8 } else { 0 };
        let duration = (row.dur * 16.0).clamp(0.0, 255.0) as u8;
        let offset = (row.offset * 16.0).clamp(-128.0, 127.0) as i8;
        let music = row.music.clamp(-1, i8::MAX as i32) as i8;

        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&scene.to_le_bytes());
        out.push(transition);
        out.push(flags);
        out.push(duration);
        out.push(offset as u8);
        out.push(music as u8);
    }
    out
}

/// Project as shipped next to the compact payloads: the timeline and the
/// module shader code live in the binary entries, display names are gone
/// and the remaining compute code is minified.
pub fn strip_for_micro(project: &Project) -> Project {
    let mut out = project.clone();
    out.track.name.clear();
    out.track.rows.clear();
    for scene in out.scenes.iter_mut() {
        scene.name.clear();
        scene.description = None;
        scene.code = None;
        for fx in scene.postfx.iter_mut() {
            fx.name.clear();
            fx.code = None;
        }
        for effect in scene.compute.iter_mut() {
            if let Some(code) = effect.code.as_mut() {
                *code = minify_shader(code);
            }
        }
    }
    for clip in out.audio.iter_mut() {
        clip.name.clear();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{PostFx, Scene, TrackRow};

    fn scene(code: &str, fx: &[(&str, bool)]) -> Scene {
        Scene {
            name: "scene".into(),
            code: Some(code.into()),
            postfx: fx
                .iter()
                .map(|(code, enabled)| PostFx {
                    name: "fx".into(),
                    enabled: *enabled,
                    code: Some(code.to_string()),
                    ..PostFx::default()
                })
                .collect(),
            ..Scene::default()
        }
    }

    #[test]
    fn test_minify_strips_comments_and_whitespace() {
        let src = "// header\nfloat4 main() {\n    /* block\n comment */ return 1; // tail\n}\n\n";
        assert_eq!(minify_shader(src), "float4 main() { return 1; }");
        assert_eq!(minify_shader("a/**/b"), "a b");
        assert_eq!(minify_shader("x = 4 / 2;"), "x = 4 / 2;");
        assert_eq!(minify_shader("  // only a comment\n"), "");
        assert_eq!(minify_shader("/* unterminated"), "");
    }

    #[test]
    fn test_entry_point_remap() {
        assert_eq!(
            remap_entry_point("float4 main(float2 p) { return 0; }", "s0"),
            "float4 s0(float2 p) { return 0; }"
        );
        assert_eq!(remap_entry_point("half4 s1 (float2 p) {}", "s1"), "half4 s1 (float2 p) {}");
        let fallback = remap_entry_point("void helper() {}", "p0");
        assert!(fallback.contains("float4 p0(float2 fragCoord"));
    }

    #[test]
    fn test_transition_stems() {
        assert_eq!(TransitionKind::from_stem("dip_to_black"), TransitionKind::DipToBlack);
        assert_eq!(TransitionKind::from_stem("Glitch"), TransitionKind::Glitch);
        assert_eq!(TransitionKind::from_stem("fade-in"), TransitionKind::FadeIn);
        assert_eq!(TransitionKind::from_stem("my_custom_wipe"), TransitionKind::None);
        assert_eq!(TransitionKind::from_stem(""), TransitionKind::None);
    }

    #[test]
    fn test_module_map_order() {
        let mut project = Project {
            scenes: vec![
                scene("float4 main() { return 0; }", &[("float4 main() { return 1; }", true), ("x", false)]),
                scene("   ", &[]),
            ],
            ..Project::default()
        };
        project.track.rows.push(TrackRow {
            trans_stem: "glitch".into(),
            ..TrackRow::default()
        });

        let map = ModuleMap::build(&project);
        assert_eq!(map.entry_points, vec!["t0", "s0", "p0"]);
        assert_eq!(map.transition_modules, [-1, -1, -1, -1, 0, -1]);
        assert_eq!(map.scene_modules, vec![1, -1]);
        assert_eq!(map.postfx_modules, vec![vec![2, -1], vec![]]);
        assert_eq!(map.modules[1], "float4 s0() { return 0; }");

        let blob = String::from_utf8(map.to_blob()).unwrap();
        let (header, body) = blob.split_once('\n').unwrap();
        assert_eq!(header, format!("U:{}", body.len()));
        assert_eq!(body.lines().count(), 3);
    }

    #[test]
    fn test_compact_track_layout() {
        let mut project = Project {
            scenes: vec![scene("float4 main() { return 0; }", &[("float4 main() { return 1; }", true)])],
            ..Project::default()
        };
        project.track.bpm = 120.5;
        project.track.len = 512;
        project.track.rows = vec![
            TrackRow {
                id: 7,
                scene: 0,
                trans_stem: "crossfade".into(),
                dur: 2.0,
                offset: -0.5,
                music: 3,
                stop: false,
                ..TrackRow::default()
            },
            TrackRow {
                id: 40_000,
                scene: -1,
                dur: 100.0,
                offset: 20.0,
                music: -1,
                stop: true,
                ..TrackRow::default()
            },
        ];

        let map = ModuleMap::build(&project);
        let bytes = compact_track(&project, &map);
        let expected_len = TRACK_HEADER_LEN + TRANSITION_SLOTS * 2 + (2 + 2 + 2) + 2 * TRACK_ROW_LEN;
        assert_eq!(bytes.len(), expected_len);

        assert_eq!(&bytes[0..4], b"TKR3");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 30_848); // 120.5 * 256
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 512);
        assert_eq!(u16::from_le_bytes([bytes[8], bytes[9]]), 2);
        assert_eq!(u16::from_le_bytes([bytes[10], bytes[11]]), 1);
        assert_eq!(&bytes[12..14], &[6, 0]);
        // crossfade is used, so slot 0 holds module 0
        assert_eq!(i16::from_le_bytes([bytes[14], bytes[15]]), 0);
        assert_eq!(i16::from_le_bytes([bytes[16], bytes[17]]), -1);

        let scene_at = TRACK_HEADER_LEN + TRANSITION_SLOTS * 2;
        assert_eq!(i16::from_le_bytes([bytes[scene_at], bytes[scene_at + 1]]), 1);
        assert_eq!(u16::from_le_bytes([bytes[scene_at + 2], bytes[scene_at + 3]]), 1);
        assert_eq!(i16::from_le_bytes([bytes[scene_at + 4], bytes[scene_at + 5]]), 2);

        let rows = &bytes[scene_at + 6..];
        assert_eq!(&rows[..TRACK_ROW_LEN], &[7, 0, 0, 0, 1, 0, 32, (-8i8) as u8, 3]);
        assert_eq!(
            &rows[TRACK_ROW_LEN..],
            &[0xff, 0x7f, 0xff, 0xff, 0, 1, 255, 127, 0xff]
        );
    }

    #[test]
    fn test_strip_for_micro() {
        let mut project = Project {
            scenes: vec![scene("float4 main() { return 0; }", &[("y", true)])],
            ..Project::default()
        };
        project.scenes[0].compute.push(crate::project::ComputeEffectDesc {
            name: "blur".into(),
            code: Some("void main() {\n  // noop\n}".into()),
            ..Default::default()
        });
        project.track.rows.push(TrackRow::default());

        let stripped = strip_for_micro(&project);
        assert!(stripped.track.rows.is_empty());
        assert!(stripped.scenes[0].name.is_empty());
        assert!(stripped.scenes[0].code.is_none());
        assert!(stripped.scenes[0].postfx[0].code.is_none());
        assert_eq!(stripped.scenes[0].compute[0].name, "blur");
        assert_eq!(stripped.scenes[0].compute[0].code.as_deref(), Some("void main() { }"));
        // the input is untouched
        assert_eq!(project.track.rows.len(), 1);
    }
}
