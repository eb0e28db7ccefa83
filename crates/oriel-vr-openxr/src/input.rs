//! Controller input: action definitions, per-frame state sync, and
//! preferred-hand tracking.

use openxr as xr;

use log::{debug, warn};
use oriel_vr::{Hand, VrError, VrResult};

use crate::session::xr_err;

pub const MAX_CONTROLLERS: usize = Hand::COUNT;

const TOUCH_CONTROLLER_PROFILE: &str = "/interaction_profiles/oculus/touch_controller";

/// Snapshot of a boolean action for one sync.
///
/// `changed` is the edge-detection mechanism: it is true only when the value
/// differs from the previous sync, so a press triggers once instead of
/// re-firing every frame it is held.
#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonState {
    pub pressed: bool,
    pub changed: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StickState {
    pub x: f32,
    pub y: f32,
    pub changed: bool,
    pub active: bool,
}

impl From<xr::ActionState<bool>> for ButtonState {
    fn from(state: xr::ActionState<bool>) -> Self {
        Self {
            pressed: state.current_state,
            changed: state.changed_since_last_sync,
            active: state.is_active,
        }
    }
}

impl From<xr::ActionState<xr::Vector2f>> for StickState {
    fn from(state: xr::ActionState<xr::Vector2f>) -> Self {
        Self {
            x: state.current_state.x,
            y: state.current_state.y,
            changed: state.changed_since_last_sync,
            active: state.is_active,
        }
    }
}

/// Action set, actions, and per-hand action spaces. Created once per
/// session; the action table is fully known at compile time.
pub struct InputStateStatic {
    // Hand spaces depend on the pose action, so they are declared first and
    // dropped first.
    hand_spaces: [Option<xr::Space>; MAX_CONTROLLERS],
    hand_subaction_paths: [xr::Path; MAX_CONTROLLERS],

    face_buttons: [xr::Action<bool>; 4],
    menu_button: xr::Action<bool>,
    hand_pose: xr::Action<xr::Posef>,
    trigger: xr::Action<bool>,
    squeeze: xr::Action<bool>,
    thumbstick: xr::Action<xr::Vector2f>,
    thumbstick_click: xr::Action<bool>,
    thumbrest_touch: xr::Action<bool>,

    action_set: xr::ActionSet,
}

impl InputStateStatic {
    pub fn new(
        instance: &xr::Instance,
        session: &xr::Session<xr::OpenGlEs>,
    ) -> VrResult<Self> {
        let action_set = instance
            .create_action_set("oriel_controls", "Oriel Controls", 1)
            .map_err(|e| VrError::Input(format!("xrCreateActionSet: {e:?}")))?;

        let left = instance
            .string_to_path("/user/hand/left")
            .map_err(|e| VrError::Input(format!("left hand path: {e:?}")))?;
        let right = instance
            .string_to_path("/user/hand/right")
            .map_err(|e| VrError::Input(format!("right hand path: {e:?}")))?;
        let hand_subaction_paths = [left, right];

        let button = |name: &str, localized: &str| {
            action_set
                .create_action::<bool>(name, localized, &[])
                .map_err(|e| VrError::Input(format!("action {name}: {e:?}")))
        };
        let face_buttons = [
            button("a_button", "A Button")?,
            button("b_button", "B Button")?,
            button("x_button", "X Button")?,
            button("y_button", "Y Button")?,
        ];
        let menu_button = button("menu", "Menu Button")?;

        // Per-hand actions share one definition and are queried through the
        // hand subaction paths.
        let hand_pose = action_set
            .create_action::<xr::Posef>("hand_pose", "Hand Pose", &hand_subaction_paths)
            .map_err(|e| VrError::Input(format!("action hand_pose: {e:?}")))?;
        let per_hand_button = |name: &str, localized: &str| {
            action_set
                .create_action::<bool>(name, localized, &hand_subaction_paths)
                .map_err(|e| VrError::Input(format!("action {name}: {e:?}")))
        };
        let trigger = per_hand_button("trigger", "Trigger")?;
        let squeeze = per_hand_button("squeeze", "Grip")?;
        let thumbstick = action_set
            .create_action::<xr::Vector2f>("thumbstick", "Thumbstick", &hand_subaction_paths)
            .map_err(|e| VrError::Input(format!("action thumbstick: {e:?}")))?;
        let thumbstick_click = per_hand_button("thumbstick_click", "Thumbstick Click")?;
        let thumbrest_touch = per_hand_button("thumbrest_touch", "Thumbrest Touch")?;

        let this = Self {
            hand_spaces: [None, None],
            hand_subaction_paths,
            face_buttons,
            menu_button,
            hand_pose,
            trigger,
            squeeze,
            thumbstick,
            thumbstick_click,
            thumbrest_touch,
            action_set,
        };
        this.suggest_touch_bindings(instance);

        session
            .attach_action_sets(&[&this.action_set])
            .map_err(|e| VrError::Input(format!("xrAttachSessionActionSets: {e:?}")))?;

        debug!("input actions and bindings initialized");
        Ok(this)
    }

    /// Suggest the Touch controller binding table. Rejection is tolerated:
    /// older runtimes may not know the profile.
    fn suggest_touch_bindings(&self, instance: &xr::Instance) {
        macro_rules! bind {
            ($bindings:expr, $action:expr, $path:expr) => {
                if let Ok(path) = instance.string_to_path($path) {
                    $bindings.push(xr::Binding::new($action, path));
                }
            };
        }

        let mut bindings = Vec::with_capacity(18);
        bind!(bindings, &self.menu_button, "/user/hand/left/input/menu/click");
        bind!(bindings, &self.hand_pose, "/user/hand/left/input/aim/pose");
        bind!(bindings, &self.hand_pose, "/user/hand/right/input/aim/pose");
        bind!(bindings, &self.face_buttons[0], "/user/hand/right/input/a/click");
        bind!(bindings, &self.face_buttons[1], "/user/hand/right/input/b/click");
        bind!(bindings, &self.face_buttons[2], "/user/hand/left/input/x/click");
        bind!(bindings, &self.face_buttons[3], "/user/hand/left/input/y/click");
        bind!(bindings, &self.trigger, "/user/hand/left/input/trigger");
        bind!(bindings, &self.trigger, "/user/hand/right/input/trigger");
        bind!(bindings, &self.squeeze, "/user/hand/left/input/squeeze/value");
        bind!(bindings, &self.squeeze, "/user/hand/right/input/squeeze/value");
        bind!(bindings, &self.thumbstick, "/user/hand/left/input/thumbstick");
        bind!(bindings, &self.thumbstick, "/user/hand/right/input/thumbstick");
        bind!(
            bindings,
            &self.thumbstick_click,
            "/user/hand/left/input/thumbstick/click"
        );
        bind!(
            bindings,
            &self.thumbstick_click,
            "/user/hand/right/input/thumbstick/click"
        );
        bind!(
            bindings,
            &self.thumbrest_touch,
            "/user/hand/left/input/thumbrest/touch"
        );
        bind!(
            bindings,
            &self.thumbrest_touch,
            "/user/hand/right/input/thumbrest/touch"
        );

        match instance.string_to_path(TOUCH_CONTROLLER_PROFILE) {
            Ok(profile) => {
                if let Err(e) = instance.suggest_interaction_profile_bindings(profile, &bindings) {
                    warn!("Touch controller binding suggestion rejected: {e:?}");
                }
            }
            Err(e) => warn!("Touch controller profile path: {e:?}"),
        }
    }
}

/// Per-frame controller state. Refreshed by the two sync calls, buttons
/// first.
#[derive(Debug, Clone, Copy)]
pub struct InputStateFrame {
    pub preferred_hand: Hand,

    pub face_buttons: [ButtonState; 4],
    pub menu_button: ButtonState,

    pub trigger: [ButtonState; MAX_CONTROLLERS],
    pub squeeze: [ButtonState; MAX_CONTROLLERS],
    pub thumbstick: [StickState; MAX_CONTROLLERS],
    pub thumbstick_click: [ButtonState; MAX_CONTROLLERS],
    pub thumbrest_touch: [ButtonState; MAX_CONTROLLERS],

    pub hand_active: [bool; MAX_CONTROLLERS],
    pub hand_poses: [xr::Posef; MAX_CONTROLLERS],
}

impl Default for InputStateFrame {
    fn default() -> Self {
        Self {
            preferred_hand: Hand::Right,
            face_buttons: Default::default(),
            menu_button: ButtonState::default(),
            trigger: Default::default(),
            squeeze: Default::default(),
            thumbstick: Default::default(),
            thumbstick_click: Default::default(),
            thumbrest_touch: Default::default(),
            hand_active: [false; MAX_CONTROLLERS],
            hand_poses: [xr::Posef::IDENTITY; MAX_CONTROLLERS],
        }
    }
}

impl InputStateFrame {
    /// One batched action sync followed by state readback. Must run before
    /// [`Self::sync_hand_poses`] each frame. Hand action spaces are created
    /// the first time their hand is seen.
    pub fn sync_buttons_and_thumbsticks(
        &mut self,
        session: &xr::Session<xr::OpenGlEs>,
        statics: &mut InputStateStatic,
    ) -> VrResult<()> {
        session
            .sync_actions(&[xr::ActiveActionSet::new(&statics.action_set)])
            .map_err(|e| xr_err("xrSyncActions", e))?;

        for (slot, action) in self.face_buttons.iter_mut().zip(&statics.face_buttons) {
            *slot = button_state(session, action, xr::Path::NULL)?;
        }
        self.menu_button = button_state(session, &statics.menu_button, xr::Path::NULL)?;

        for hand in [Hand::Left, Hand::Right] {
            let index = hand.index();
            let path = statics.hand_subaction_paths[index];

            self.trigger[index] = button_state(session, &statics.trigger, path)?;
            self.squeeze[index] = button_state(session, &statics.squeeze, path)?;
            self.thumbstick[index] = statics
                .thumbstick
                .state(session, path)
                .map(StickState::from)
                .map_err(|e| xr_err("xrGetActionStateVector2f", e))?;
            self.thumbstick_click[index] =
                button_state(session, &statics.thumbstick_click, path)?;
            self.thumbrest_touch[index] =
                button_state(session, &statics.thumbrest_touch, path)?;

            if statics.hand_spaces[index].is_none() {
                let space = statics
                    .hand_pose
                    .create_space(session, path, xr::Posef::IDENTITY)
                    .map_err(|e| xr_err("xrCreateActionSpace", e))?;
                statics.hand_spaces[index] = Some(space);
                debug!("created {hand:?} hand action space");
            }

            self.hand_active[index] = statics
                .hand_pose
                .is_active(session, path)
                .map_err(|e| xr_err("xrGetActionStatePose", e))?;
        }

        Ok(())
    }

    /// Locate both hands at the frame's predicted display time and update
    /// the preferred hand.
    pub fn sync_hand_poses(
        &mut self,
        statics: &InputStateStatic,
        reference_space: &xr::Space,
        predicted_display_time: xr::Time,
    ) -> VrResult<()> {
        for index in 0..MAX_CONTROLLERS {
            match &statics.hand_spaces[index] {
                Some(space) => {
                    let location = space
                        .locate(reference_space, predicted_display_time)
                        .map_err(|e| xr_err("xrLocateSpace", e))?;
                    let position_valid = location
                        .location_flags
                        .contains(xr::SpaceLocationFlags::POSITION_VALID);
                    self.hand_poses[index] = location.pose;
                    // A hand counts as active only with usable tracking.
                    self.hand_active[index] = self.hand_active[index] && position_valid;
                }
                None => self.hand_active[index] = false,
            }
        }

        let left = self.trigger[Hand::Left.index()];
        let right = self.trigger[Hand::Right.index()];
        self.preferred_hand = select_preferred_hand(
            self.preferred_hand,
            self.hand_active[Hand::Left.index()],
            self.hand_active[Hand::Right.index()],
            left.changed && left.pressed,
            right.changed && right.pressed,
        );
        Ok(())
    }

    /// Whether any button edge occurred during the last sync.
    pub fn has_button_changes(&self) -> bool {
        if self.face_buttons.iter().any(|b| b.changed) || self.menu_button.changed {
            return true;
        }
        (0..MAX_CONTROLLERS).any(|hand| {
            self.thumbstick_click[hand].changed
                || self.thumbrest_touch[hand].changed
                || self.trigger[hand].changed
                || self.squeeze[hand].changed
        })
    }
}

fn button_state(
    session: &xr::Session<xr::OpenGlEs>,
    action: &xr::Action<bool>,
    subaction_path: xr::Path,
) -> VrResult<ButtonState> {
    action
        .state(session, subaction_path)
        .map(ButtonState::from)
        .map_err(|e| xr_err("xrGetActionStateBoolean", e))
}

/// Preferred-hand hysteresis.
///
/// A single active hand always wins. With both hands active, preference
/// flips only on a fresh trigger-down edge on the other hand; with neither
/// active the previous preference survives. This keeps pointing stable when
/// both controllers are tracked at once.
pub(crate) fn select_preferred_hand(
    previous: Hand,
    left_active: bool,
    right_active: bool,
    left_trigger_edge: bool,
    right_trigger_edge: bool,
) -> Hand {
    match (left_active, right_active) {
        (true, false) => Hand::Left,
        (false, true) => Hand::Right,
        (true, true) => {
            if left_trigger_edge {
                Hand::Left
            } else if right_trigger_edge {
                Hand::Right
            } else {
                previous
            }
        }
        (false, false) => previous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_active_hand_is_preferred_regardless_of_history() {
        assert_eq!(
            select_preferred_hand(Hand::Right, true, false, false, false),
            Hand::Left
        );
        assert_eq!(
            select_preferred_hand(Hand::Left, false, true, false, false),
            Hand::Right
        );
    }

    #[test]
    fn both_hands_active_without_edges_keeps_preference() {
        assert_eq!(
            select_preferred_hand(Hand::Left, true, true, false, false),
            Hand::Left
        );
        assert_eq!(
            select_preferred_hand(Hand::Right, true, true, false, false),
            Hand::Right
        );
    }

    #[test]
    fn trigger_edge_on_other_hand_flips_preference() {
        assert_eq!(
            select_preferred_hand(Hand::Right, true, true, true, false),
            Hand::Left
        );
        assert_eq!(
            select_preferred_hand(Hand::Left, true, true, false, true),
            Hand::Right
        );
    }

    #[test]
    fn simultaneous_edges_favor_the_left_check_order() {
        assert_eq!(
            select_preferred_hand(Hand::Right, true, true, true, true),
            Hand::Left
        );
    }

    #[test]
    fn no_active_hands_keeps_preference() {
        assert_eq!(
            select_preferred_hand(Hand::Left, false, false, true, true),
            Hand::Left
        );
    }

    #[test]
    fn button_edges_are_detected() {
        let mut frame = InputStateFrame::default();
        assert!(!frame.has_button_changes());

        frame.menu_button.changed = true;
        assert!(frame.has_button_changes());

        frame.menu_button.changed = false;
        frame.squeeze[1].changed = true;
        assert!(frame.has_button_changes());
    }
}
