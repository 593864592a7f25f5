//! Fan-in/fan-out action dispatch (spec §4.10), grounded in the host's
//! `ActionDispatcher`: any number of listeners (UI panels, MIDI mapping,
//! automation) register to observe every dispatched [`ActionEvent`].
//!
//! Listeners are snapshotted out from under the mutex before being invoked,
//! so a listener that itself calls `dispatch` (e.g. a macro expanding into
//! several actions) can't deadlock against the listener list.

use std::sync::{Arc, Mutex};

use crate::action::{Action, ActionEvent};

/// Receives every action the dispatcher is asked to carry out.
pub trait ActionListener: Send + Sync {
    fn on_action(&self, event: &ActionEvent);
}

impl<F: Fn(&ActionEvent) + Send + Sync> ActionListener for F {
    fn on_action(&self, event: &ActionEvent) {
        self(event);
    }
}

/// Central fan-out point for [`ActionEvent`]s.
#[derive(Default)]
pub struct ActionDispatcher {
    listeners: Mutex<Vec<Arc<dyn ActionListener>>>,
}

impl ActionDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ActionListener>) {
        self.listeners.lock().expect("listener mutex poisoned").push(listener);
    }

    /// Removes every registered listener pointer-equal to `listener`.
    pub fn remove_listener(&self, listener: &Arc<dyn ActionListener>) {
        let mut listeners = self.listeners.lock().expect("listener mutex poisoned");
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Notifies every registered listener of `event`, in registration order.
    pub fn dispatch(&self, event: ActionEvent) {
        let snapshot: Vec<_> = self.listeners.lock().expect("listener mutex poisoned").clone();
        for listener in &snapshot {
            listener.on_action(&event);
        }
    }

    pub fn plugin_bypass(&self, index: i32) {
        self.dispatch(ActionEvent::new(Action::PluginBypass).with_int(index));
    }

    pub fn master_bypass(&self) {
        self.dispatch(ActionEvent::new(Action::MasterBypass));
    }

    pub fn set_volume(&self, target: impl Into<String>, value: f32) {
        self.dispatch(ActionEvent::new(Action::SetVolume).with_string(target).with_float(value));
    }

    pub fn toggle_mute(&self, target: impl Into<String>) {
        self.dispatch(ActionEvent::new(Action::ToggleMute).with_string(target));
    }

    pub fn load_preset(&self, index: i32) {
        self.dispatch(ActionEvent::new(Action::LoadPreset).with_int(index));
    }

    pub fn panic_mute(&self) {
        self.dispatch(ActionEvent::new(Action::PanicMute));
    }

    pub fn input_gain_adjust(&self, delta: f32) {
        self.dispatch(ActionEvent::new(Action::InputGainAdjust).with_float(delta));
    }

    pub fn input_mute_toggle(&self) {
        self.dispatch(ActionEvent::new(Action::InputMuteToggle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listener_receives_dispatched_action() {
        let dispatcher = ActionDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        dispatcher.add_listener(Arc::new(move |event: &ActionEvent| {
            assert_eq!(event.action, Action::PanicMute);
            seen.fetch_add(1, Ordering::Relaxed);
        }));
        dispatcher.panic_mute();
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn multiple_listeners_all_observe_one_dispatch() {
        let dispatcher = ActionDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let seen = Arc::clone(&count);
            dispatcher.add_listener(Arc::new(move |_: &ActionEvent| {
                seen.fetch_add(1, Ordering::Relaxed);
            }));
        }
        dispatcher.master_bypass();
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let dispatcher = ActionDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let listener: Arc<dyn ActionListener> = Arc::new(move |_: &ActionEvent| {
            seen.fetch_add(1, Ordering::Relaxed);
        });
        dispatcher.add_listener(Arc::clone(&listener));
        dispatcher.remove_listener(&listener);
        dispatcher.panic_mute();
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn convenience_methods_set_expected_parameters() {
        let dispatcher = ActionDispatcher::new();
        let captured: Arc<Mutex<Option<ActionEvent>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&captured);
        dispatcher.add_listener(Arc::new(move |event: &ActionEvent| {
            *slot.lock().unwrap() = Some(event.clone());
        }));
        dispatcher.set_volume("monitor", 0.75);
        let event = captured.lock().unwrap().clone().unwrap();
        assert_eq!(event.action, Action::SetVolume);
        assert_eq!(event.string_param, "monitor");
        assert!((event.float_param - 0.75).abs() < f32::EPSILON);
    }
}
