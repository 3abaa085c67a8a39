//! In-memory layer configuration, loaded from a plain `name=value` file.
//!
//! Files live in `$HAND_TO_CONTROLLER_CONFIG_DIR`, falling back to
//! `$XDG_CONFIG_HOME/hand_to_controller` then `$HOME/.config/hand_to_controller`,
//! and are looked up as `<application>.cfg` first, `<engine>.cfg` second.
//! Malformed lines are warned about and skipped; a missing file leaves the
//! defaults in place with `loaded` unset.

use crate::hands::{joint, JOINT_COUNT};
use log::{info, warn};
use openxr_sys as xr;
use std::path::{Path, PathBuf};

pub const DEFAULT_PROFILE: &str = "/interaction_profiles/hp/mixed_reality_controller";

pub const ENV_CONFIG_DIR: &str = "HAND_TO_CONTROLLER_CONFIG_DIR";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GestureKind {
    Pinch,
    ThumbPress,
    IndexBend,
    Squeeze,
    PalmTap,
    WristTap,
    IndexProximalTap,
    LittleProximalTap,
}

pub const GESTURE_COUNT: usize = 8;

impl GestureKind {
    pub const ALL: [GestureKind; GESTURE_COUNT] = [
        GestureKind::Pinch,
        GestureKind::ThumbPress,
        GestureKind::IndexBend,
        GestureKind::Squeeze,
        GestureKind::PalmTap,
        GestureKind::WristTap,
        GestureKind::IndexProximalTap,
        GestureKind::LittleProximalTap,
    ];

    /// The key this gesture goes by in config files.
    pub fn key(self) -> &'static str {
        match self {
            GestureKind::Pinch => "pinch",
            GestureKind::ThumbPress => "thumb_press",
            GestureKind::IndexBend => "index_bend",
            GestureKind::Squeeze => "squeeze",
            GestureKind::PalmTap => "palm_tap",
            GestureKind::WristTap => "wrist_tap",
            GestureKind::IndexProximalTap => "index_proximal_tap",
            GestureKind::LittleProximalTap => "little_proximal_tap",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Target binding suffix (per side) and the distance window mapping onto
/// [0, 1]. An empty target leaves the gesture unbound for that side.
#[derive(Clone, Debug)]
pub struct GestureConfig {
    pub target: [String; 2],
    pub near: f32,
    pub far: f32,
}

impl GestureConfig {
    fn new(left: &str, right: &str, near: f32, far: f32) -> Self {
        Self {
            target: [left.to_owned(), right.to_owned()],
            near,
            far,
        }
    }
}

pub struct Config {
    pub loaded: bool,
    pub raw_interaction_profile: String,
    pub enabled: [bool; 2],
    pub aim_joint: usize,
    pub grip_joint: usize,
    pub click_threshold: f32,
    pub transform: [xr::Posef; 2],
    gestures: [GestureConfig; GESTURE_COUNT],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            loaded: false,
            raw_interaction_profile: DEFAULT_PROFILE.to_owned(),
            enabled: [true, true],
            aim_joint: joint::INDEX_INTERMEDIATE,
            grip_joint: joint::PALM,
            click_threshold: 0.75,
            transform: [xr::Posef::IDENTITY, xr::Posef::IDENTITY],
            gestures: [
                GestureConfig::new("/input/trigger/value", "/input/trigger/value", 0.01, 0.06),
                GestureConfig::new("", "", 0.01, 0.05),
                GestureConfig::new("", "", 0.045, 0.07),
                GestureConfig::new("/input/squeeze/value", "/input/squeeze/value", 0.01, 0.07),
                GestureConfig::new("", "", 0.02, 0.06),
                GestureConfig::new("/input/menu/click", "/input/menu/click", 0.04, 0.05),
                GestureConfig::new("/input/y/click", "/input/b/click", 0.02, 0.035),
                GestureConfig::new("/input/x/click", "/input/a/click", 0.02, 0.035),
            ],
        }
    }
}

fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        return Some(PathBuf::from(dir));
    }
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
        .map(|base| base.join("hand_to_controller"))
        .ok()
}

impl Config {
    #[inline]
    pub fn gesture(&self, kind: GestureKind) -> &GestureConfig {
        &self.gestures[kind.index()]
    }

    /// Loads configuration keyed by application name first, engine name
    /// second. Never fails; an unloadable config leaves the defaults with
    /// `loaded == false`.
    pub fn load(application_name: &str, engine_name: &str) -> Self {
        let mut config = Self::default();
        let Some(dir) = config_dir() else {
            warn!("No config directory could be determined");
            return config;
        };
        for name in [application_name, engine_name] {
            if name.is_empty() {
                continue;
            }
            let path = dir.join(format!("{name}.cfg"));
            if config.load_file(&path) {
                info!("Loaded config for {name:?}");
                config.loaded = true;
                break;
            }
        }
        if config.loaded {
            config.log_summary();
        }
        config
    }

    fn load_file(&mut self, path: &Path) -> bool {
        let Ok(text) = std::fs::read_to_string(path) else {
            info!("Could not read config at {}", path.display());
            return false;
        };
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Err(error) = self.apply_line(line) {
                warn!("{}:{}: {error}", path.display(), index + 1);
            }
        }
        true
    }

    fn apply_line(&mut self, line: &str) -> Result<(), String> {
        let (name, value) = line
            .split_once('=')
            .ok_or_else(|| format!("expected name=value, got {line:?}"))?;
        let (name, value) = (name.trim(), value.trim());

        let (side, key) = if let Some(rest) = name.strip_prefix("left.") {
            (Some(0), rest)
        } else if let Some(rest) = name.strip_prefix("right.") {
            (Some(1), rest)
        } else {
            (None, name)
        };

        match (side, key) {
            (None, "interaction_profile") => {
                self.raw_interaction_profile = value.to_owned();
            }
            (None, "aim_joint") => self.aim_joint = parse_joint(value)?,
            (None, "grip_joint") => self.grip_joint = parse_joint(value)?,
            (None, "click_threshold") => self.click_threshold = parse_float(value)?,
            (Some(side), "enabled") => {
                self.enabled[side] = value == "1" || value == "true";
            }
            (Some(side), "transform.vec") => {
                let [x, y, z] = parse_floats::<3>(value)?;
                self.transform[side].position = xr::Vector3f { x, y, z };
            }
            (Some(side), "transform.quat") => {
                let [x, y, z, w] = parse_floats::<4>(value)?;
                self.transform[side].orientation = xr::Quaternionf { x, y, z, w };
            }
            (Some(side), key) => {
                let kind = GestureKind::from_key(key)
                    .ok_or_else(|| format!("unknown setting {name:?}"))?;
                self.gestures[kind.index()].target[side] = value.to_owned();
            }
            (None, key) => {
                let (gesture, bound) = key
                    .rsplit_once('.')
                    .ok_or_else(|| format!("unknown setting {name:?}"))?;
                let kind = GestureKind::from_key(gesture)
                    .ok_or_else(|| format!("unknown setting {name:?}"))?;
                match bound {
                    "near" => self.gestures[kind.index()].near = parse_float(value)?,
                    "far" => self.gestures[kind.index()].far = parse_float(value)?,
                    _ => return Err(format!("unknown setting {name:?}")),
                }
            }
        }
        Ok(())
    }

    fn log_summary(&self) {
        info!("Emulating interaction profile: {}", self.raw_interaction_profile);
        for (index, name) in ["Left", "Right"].into_iter().enumerate() {
            if !self.enabled[index] {
                info!("{name} hand disabled");
                continue;
            }
            let t = &self.transform[index];
            info!(
                "{name} transform: ({:.3}, {:.3}, {:.3}) ({:.3}, {:.3}, {:.3}, {:.3})",
                t.position.x,
                t.position.y,
                t.position.z,
                t.orientation.x,
                t.orientation.y,
                t.orientation.z,
                t.orientation.w,
            );
            for kind in GestureKind::ALL {
                let gesture = self.gesture(kind);
                if !gesture.target[index].is_empty() {
                    info!(
                        "{name} hand {} translates to: {} (near: {:.3}, far: {:.3})",
                        kind.key(),
                        gesture.target[index],
                        gesture.near,
                        gesture.far,
                    );
                }
            }
        }
        if self.enabled.iter().any(|e| *e) {
            info!("Grip pose uses joint: {}", self.grip_joint);
            info!("Aim pose uses joint: {}", self.aim_joint);
            info!("Click threshold: {:.3}", self.click_threshold);
        }
    }
}

fn parse_float(value: &str) -> Result<f32, String> {
    value
        .parse()
        .map_err(|_| format!("expected a number, got {value:?}"))
}

fn parse_floats<const N: usize>(value: &str) -> Result<[f32; N], String> {
    let mut out = [0.0; N];
    let mut parts = value.split_whitespace();
    for slot in &mut out {
        *slot = parse_float(parts.next().ok_or_else(|| {
            format!("expected {N} space-separated numbers, got {value:?}")
        })?)?;
    }
    if parts.next().is_some() {
        return Err(format!("expected {N} space-separated numbers, got {value:?}"));
    }
    Ok(out)
}

fn parse_joint(value: &str) -> Result<usize, String> {
    let index: usize = value
        .parse()
        .map_err(|_| format!("expected a joint index, got {value:?}"))?;
    if index >= JOINT_COUNT {
        return Err(format!("joint index {index} out of range"));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(config: &mut Config, lines: &str) -> Vec<String> {
        let mut errors = Vec::new();
        for line in lines.lines().filter(|l| !l.trim().is_empty()) {
            if let Err(e) = config.apply_line(line.trim()) {
                errors.push(e);
            }
        }
        errors
    }

    #[test]
    fn parses_core_settings() {
        let mut config = Config::default();
        let errors = apply(
            &mut config,
            "interaction_profile=/interaction_profiles/microsoft/motion_controller\n\
             click_threshold=0.5\n\
             grip_joint=1\n\
             aim_joint=10\n\
             right.enabled=false\n\
             left.transform.vec=0 0 0.03\n\
             left.transform.quat=0 0 0 1",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(
            config.raw_interaction_profile,
            "/interaction_profiles/microsoft/motion_controller"
        );
        assert_eq!(config.click_threshold, 0.5);
        assert_eq!(config.grip_joint, joint::WRIST);
        assert_eq!(config.aim_joint, joint::INDEX_TIP);
        assert_eq!(config.enabled, [true, false]);
        assert_eq!(config.transform[0].position.z, 0.03);
    }

    #[test]
    fn parses_gesture_bindings() {
        let mut config = Config::default();
        let errors = apply(
            &mut config,
            "left.pinch=/input/trigger/value\n\
             right.pinch=\n\
             pinch.near=0.02\n\
             pinch.far=0.08\n\
             left.wrist_tap=/input/menu/click",
        );
        assert!(errors.is_empty(), "{errors:?}");
        let pinch = config.gesture(GestureKind::Pinch);
        assert_eq!(pinch.target[0], "/input/trigger/value");
        assert_eq!(pinch.target[1], "");
        assert_eq!(pinch.near, 0.02);
        assert_eq!(pinch.far, 0.08);
        assert_eq!(
            config.gesture(GestureKind::WristTap).target[0],
            "/input/menu/click"
        );
    }

    #[test]
    fn bad_lines_are_reported_and_skipped() {
        let mut config = Config::default();
        let errors = apply(
            &mut config,
            "click_threshold=not-a-number\n\
             nonsense\n\
             mystery.setting=1\n\
             grip_joint=99\n\
             aim_joint=10",
        );
        assert_eq!(errors.len(), 4);
        // The bad lines left the defaults alone, the good one applied.
        assert_eq!(config.click_threshold, 0.75);
        assert_eq!(config.grip_joint, joint::PALM);
        assert_eq!(config.aim_joint, joint::INDEX_TIP);
    }

    #[test]
    fn defaults_match_the_documented_profile() {
        let config = Config::default();
        assert!(!config.loaded);
        assert_eq!(config.raw_interaction_profile, DEFAULT_PROFILE);
        assert_eq!(config.click_threshold, 0.75);
        assert_eq!(config.grip_joint, joint::PALM);
        assert_eq!(config.aim_joint, joint::INDEX_INTERMEDIATE);
        assert_eq!(config.enabled, [true, true]);
        let pinch = config.gesture(GestureKind::Pinch);
        assert_eq!(pinch.target, ["/input/trigger/value", "/input/trigger/value"]);
        assert_eq!((pinch.near, pinch.far), (0.01, 0.06));
        assert_eq!(
            config.gesture(GestureKind::IndexProximalTap).target,
            ["/input/y/click", "/input/b/click"]
        );
    }
}
