pub mod actuator;
pub mod controller;

pub use actuator::{Actuator, ActuatorCall, ActuatorLog, MockActuator, SysfsGpioActuator};
pub use controller::{spawn_gate, GateAction, GateController, GateHandle, GateMachine, GateState};
