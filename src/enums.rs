//! Human readable descriptions of the enumeration values the API reports,
//! e.g. `BSH.Common.EnumType.DoorState.Locked`.

/// Values of one enumeration type with their descriptions.
struct EnumType {
    name: &'static str,
    values: &'static [(&'static str, &'static str)],
}

const TYPES: &[EnumType] = &[
    EnumType {
        name: "BSH.Common.EnumType.DoorState",
        values: &[
            ("Open", "The door of the home appliance is open."),
            ("Closed", "The door of the home appliance is closed but not locked."),
            ("Locked", "The door of the home appliance is locked."),
        ],
    },
    EnumType {
        name: "BSH.Common.EnumType.EventPresentState",
        values: &[
            ("Present", "The event occurred and is present."),
            ("Off", "The event is off."),
            ("Confirmed", "The event has been confirmed by the user."),
        ],
    },
    EnumType {
        name: "BSH.Common.EnumType.OperationState",
        values: &[
            ("Inactive", "Home appliance is switched off or in standby (only available for oven, dishwasher and coffee maker)."),
            ("Ready", "Home appliance is switched on. No program has been activated."),
            ("DelayedStart", "A program has been activated but has not been started yet if a delayed start has been configured."),
            ("Run", "A program is currently activated and runs."),
            ("Pause", "An activated program has been paused."),
            ("ActionRequired", "The activated program requires a user interaction."),
            ("Finished", "The activated program has finished or has been aborted successfully."),
            ("Error", "The home appliance is in an error state."),
            ("Aborting", "The activated program is currently aborting."),
        ],
    },
    EnumType {
        name: "BSH.Common.EnumType.PowerState",
        values: &[
            ("Off", "The home appliance switched to off state but can be switched on by writing the value BSH.Common.EnumType.PowerState.On to this setting."),
            ("On", "The home appliance switched to on state. You can switch it off by writing the value BSH.Common.EnumType.PowerState.Off to this setting (only supported on ovens, dishwashers and coffee makers)."),
            ("Standby", "The home appliance went to standby mode. You can switch it on or off by changing the value of this setting appropriately."),
        ],
    },
    EnumType {
        name: "LaundryCare.Washer.EnumType.Temperature",
        values: &[
            ("Cold", "Cold"),
            ("GC20", "20 degrees celsius"),
            ("GC30", "30 degrees celsius"),
            ("GC40", "40 degrees celsius"),
            ("GC50", "50 degrees celsius"),
            ("GC60", "60 degrees celsius"),
            ("GC70", "70 degrees celsius"),
            ("GC80", "80 degrees celsius"),
            ("GC90", "90 degrees celsius"),
        ],
    },
    EnumType {
        name: "LaundryCare.Washer.EnumType.SpinSpeed",
        values: &[
            ("Off", "The washer will not spin."),
            ("RPM400", "The washer will spin with 400 rpm."),
            ("RPM600", "The washer will spin with 600 rpm."),
            ("RPM800", "The washer will spin with 800 rpm."),
            ("RPM1000", "The washer will spin with 1000 rpm."),
            ("RPM1200", "The washer will spin with 1200 rpm."),
            ("RPM1400", "The washer will spin with 1400 rpm."),
            ("RPM1600", "The washer will spin with 1600 rpm."),
        ],
    },
    EnumType {
        name: "LaundryCare.Dryer.EnumType.DryingTarget",
        values: &[
            ("IronDry", "The dryer will stop drying if the clothes are iron dry."),
            ("CupboardDry", "The dryer will stop drying if the clothes are cupboard dry."),
            ("CupboardDryPlus", "The dryer will stop drying if the clothes are absolutely dry."),
        ],
    },
    EnumType {
        name: "ConsumerProducts.CoffeeMaker.EnumType.BeanAmount",
        values: &[
            ("Mild", "Mild coffee"),
            ("Normal", "Normal coffee"),
            ("Strong", "Strong coffee"),
            ("VeryStrong", "Very strong coffee"),
            ("DoubleShot", "Extra strong coffee"),
            ("DoubleShotPlus", "Extra strong coffee is ground and brewed in two steps to reduce bitterness"),
        ],
    },
    // EU ranges in ml: min-max (step)
    EnumType {
        name: "ConsumerProducts.CoffeeMaker.EnumType.FillQuantity",
        values: &[
            ("Espresso", "35-60 (5)"),
            ("EspressoMacchiato", "40-60 (10)"),
            ("Coffee", "60-250 (10)"),
            ("Cappuccino", "100-300 (20)"),
            ("LatteMacchiato", "200-400 (20)"),
            ("CaffeLatte", "100-400 (20)"),
        ],
    },
];

/// Describe `value` of the enumeration `enum_type`, e.g.
/// `describe("BSH.Common.EnumType.DoorState", "Open")`.
pub fn describe(enum_type: &str, value: &str) -> Option<&'static str> {
    TYPES
        .iter()
        .find(|entry| entry.name == enum_type)?
        .values
        .iter()
        .find(|(name, _)| *name == value)
        .map(|(_, description)| *description)
}

/// Describe a fully qualified value as it appears in status and event
/// items, e.g. `BSH.Common.EnumType.DoorState.Open`.
pub fn describe_value(value: &str) -> Option<&'static str> {
    let (enum_type, value) = value.rsplit_once('.')?;
    describe(enum_type, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(
            describe("BSH.Common.EnumType.DoorState", "Locked"),
            Some("The door of the home appliance is locked.")
        );
        assert_eq!(
            describe("BSH.Common.EnumType.OperationState", "Ready"),
            Some("Home appliance is switched on. No program has been activated.")
        );
        assert_eq!(
            describe("ConsumerProducts.CoffeeMaker.EnumType.FillQuantity", "Coffee"),
            Some("60-250 (10)")
        );
    }

    #[test]
    fn test_same_value_name_in_different_types() {
        assert_eq!(
            describe("LaundryCare.Washer.EnumType.SpinSpeed", "Off"),
            Some("The washer will not spin.")
        );
        assert_eq!(
            describe("BSH.Common.EnumType.EventPresentState", "Off"),
            Some("The event is off.")
        );
    }

    #[test]
    fn test_unknown_type_or_value() {
        assert_eq!(describe("BSH.Common.EnumType.DoorState", "Ajar"), None);
        assert_eq!(describe("Cooking.Oven.EnumType.Heating", "Off"), None);
        assert_eq!(describe("", ""), None);
    }

    #[test]
    fn test_describe_full_value() {
        assert_eq!(
            describe_value("LaundryCare.Washer.EnumType.Temperature.GC40"),
            Some("40 degrees celsius")
        );
        assert_eq!(describe_value("BSH.Common.EnumType.DoorState.Ajar"), None);
        assert_eq!(describe_value("NoDots"), None);
    }

    #[test]
    fn test_types_are_unique() {
        for (i, a) in TYPES.iter().enumerate() {
            for b in &TYPES[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }
}
