use std::fmt;
use std::str::FromStr;

use super::AssignmentError;


/// The three daily periods that are assigned separately.  Each owns one network scenario.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, PartialOrd, Ord)]
pub enum TimePeriod {
    /// morning peak hour
    Aht,
    /// midday hour
    Pt,
    /// afternoon peak hour
    Iht,
}

impl TimePeriod {
    pub fn all() -> [TimePeriod; 3] {
        return [TimePeriod::Aht, TimePeriod::Pt, TimePeriod::Iht];
    }

    /// Position of the period in the scenario and matrix numbering.
    pub fn index(&self) -> u32 {
        match self {
            TimePeriod::Aht => 0,
            TimePeriod::Pt => 1,
            TimePeriod::Iht => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimePeriod::Aht => "aht",
            TimePeriod::Pt => "pt",
            TimePeriod::Iht => "iht",
        }
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, ff: &mut fmt::Formatter) -> fmt::Result {
        write!(ff, "{}", self.as_str())
    }
}

impl FromStr for TimePeriod {
    type Err = AssignmentError;

    fn from_str(ss: &str) -> Result<TimePeriod, AssignmentError> {
        match ss {
            "aht" => Ok(TimePeriod::Aht),
            "pt" => Ok(TimePeriod::Pt),
            "iht" => Ok(TimePeriod::Iht),
            _ => Err(AssignmentError::InvalidInput(format!("unknown time period {}", ss))),
        }
    }
}


/// Demand categories routed through the network.  Walk has no demand of its own; it only
/// receives results from the pedestrian assignment.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, PartialOrd, Ord)]
pub enum AssignmentClass {
    CarWork,
    CarLeisure,
    TransitWork,
    TransitLeisure,
    Bike,
    Walk,
    Van,
    Truck,
    TrailerTruck,
}

impl AssignmentClass {
    pub fn all() -> [AssignmentClass; 9] {
        return [
            AssignmentClass::CarWork,
            AssignmentClass::CarLeisure,
            AssignmentClass::TransitWork,
            AssignmentClass::TransitLeisure,
            AssignmentClass::Bike,
            AssignmentClass::Walk,
            AssignmentClass::Van,
            AssignmentClass::Truck,
            AssignmentClass::TrailerTruck,
        ];
    }

    pub fn car_classes() -> [AssignmentClass; 2] {
        return [AssignmentClass::CarWork, AssignmentClass::CarLeisure];
    }

    pub fn transit_classes() -> [AssignmentClass; 2] {
        return [AssignmentClass::TransitWork, AssignmentClass::TransitLeisure];
    }

    pub fn freight_classes() -> [AssignmentClass; 3] {
        return [AssignmentClass::Van, AssignmentClass::Truck, AssignmentClass::TrailerTruck];
    }

    pub fn is_car(&self) -> bool {
        return AssignmentClass::car_classes().contains(self);
    }

    pub fn is_transit(&self) -> bool {
        return AssignmentClass::transit_classes().contains(self);
    }

    pub fn is_freight(&self) -> bool {
        return AssignmentClass::freight_classes().contains(self);
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentClass::CarWork => "car_work",
            AssignmentClass::CarLeisure => "car_leisure",
            AssignmentClass::TransitWork => "transit_work",
            AssignmentClass::TransitLeisure => "transit_leisure",
            AssignmentClass::Bike => "bike",
            AssignmentClass::Walk => "walk",
            AssignmentClass::Van => "van",
            AssignmentClass::Truck => "truck",
            AssignmentClass::TrailerTruck => "trailer_truck",
        }
    }
}

impl fmt::Display for AssignmentClass {
    fn fmt(&self, ff: &mut fmt::Formatter) -> fmt::Result {
        write!(ff, "{}", self.as_str())
    }
}

impl FromStr for AssignmentClass {
    type Err = AssignmentError;

    fn from_str(ss: &str) -> Result<AssignmentClass, AssignmentError> {
        match AssignmentClass::all().iter().find(|cc| cc.as_str() == ss) {
            Some(class) => Ok(*class),
            None => Err(AssignmentError::InvalidInput(format!("unknown assignment class {}", ss))),
        }
    }
}


/// Trip purpose that decides which value of time a car class perceives.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum Purpose {
    Work,
    Leisure,
}


#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, PartialOrd, Ord)]
pub enum ImpedanceType {
    Time,
    Cost,
    Dist,
}

impl ImpedanceType {
    pub fn all() -> [ImpedanceType; 3] {
        return [ImpedanceType::Time, ImpedanceType::Dist, ImpedanceType::Cost];
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImpedanceType::Time => "time",
            ImpedanceType::Cost => "cost",
            ImpedanceType::Dist => "dist",
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_names_roundtrip_through_from_str() {
        for class in AssignmentClass::all().iter() {
            assert_eq!(class.as_str().parse::<AssignmentClass>().unwrap(), *class);
        }
        assert!("tram".parse::<AssignmentClass>().is_err());
    }

    #[test]
    fn test_class_groups() {
        assert!(AssignmentClass::CarLeisure.is_car());
        assert!(AssignmentClass::TransitLeisure.is_transit());
        assert!(AssignmentClass::TrailerTruck.is_freight());
        assert!(!AssignmentClass::Bike.is_car());
        assert!(!AssignmentClass::Walk.is_transit());
    }

    #[test]
    fn test_time_period_indices() {
        let indices: Vec<u32> = TimePeriod::all().iter().map(|tp| tp.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!("pt".parse::<TimePeriod>().unwrap(), TimePeriod::Pt);
        assert!("night".parse::<TimePeriod>().is_err());
    }
}
