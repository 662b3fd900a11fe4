use std::collections::BTreeMap;
use std::fmt;

use super::AssignmentClass;
use super::AssignmentError;
use super::TimePeriod;


/// Placeholder for OD pairs without a path.  Result matrices start filled with it.
pub static UNREACHABLE: f64 = 999999.;

#[derive(PartialEq, Eq, Hash, Debug, Clone, PartialOrd, Ord)]
pub struct MatrixId(String);

impl MatrixId {
    pub fn new(number: u32) -> MatrixId {
        MatrixId(format!("mf{}", number))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatrixId {
    fn fmt(&self, ff: &mut fmt::Formatter) -> fmt::Result {
        write!(ff, "{}", self.0)
    }
}

#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, PartialOrd, Ord)]
pub enum MatrixKind {
    Demand,
    Time,
    Dist,
    Cost,
    GenCost,
    FirstWait,
    TotalWait,
    InVehicleTime,
    AuxTime,
    NumBoardings,
    BoardTime,
    BoardCost,
}

impl MatrixKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatrixKind::Demand => "demand",
            MatrixKind::Time => "time",
            MatrixKind::Dist => "dist",
            MatrixKind::Cost => "cost",
            MatrixKind::GenCost => "gen_cost",
            MatrixKind::FirstWait => "fw_time",
            MatrixKind::TotalWait => "tw_time",
            MatrixKind::InVehicleTime => "inv_time",
            MatrixKind::AuxTime => "aux_time",
            MatrixKind::NumBoardings => "num_board",
            MatrixKind::BoardTime => "board_time",
            MatrixKind::BoardCost => "board_cost",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            MatrixKind::Demand => "demand",
            MatrixKind::Time => "travel time",
            MatrixKind::Dist => "travel distance",
            MatrixKind::Cost => "travel cost",
            MatrixKind::GenCost => "generalized cost",
            MatrixKind::FirstWait => "first waiting time",
            MatrixKind::TotalWait => "total waiting time",
            MatrixKind::InVehicleTime => "in-vehicle time",
            MatrixKind::AuxTime => "auxiliary transit time",
            MatrixKind::NumBoardings => "number of boardings",
            MatrixKind::BoardTime => "boarding time",
            MatrixKind::BoardCost => "fare zone boarding cost",
        }
    }

    /// Demand matrices start empty, result matrices start unreachable.
    pub fn default_value(&self) -> f64 {
        match self {
            MatrixKind::Demand => 0.,
            _ => UNREACHABLE,
        }
    }
}

/// One matrix slot that the registry hands out.
#[derive(PartialEq, Debug, Clone)]
pub struct MatrixSlot {
    pub id: MatrixId,
    pub name: String,
    pub description: String,
    pub default_value: f64,
}

// Offsets of every matrix within a block of 100 ids.
fn layout() -> Vec<(MatrixKind, AssignmentClass, u32)> {
    use AssignmentClass::*;
    use MatrixKind::*;
    let mut slots = vec![
        (Demand, CarWork, 1), (Demand, CarLeisure, 2), (Demand, TransitWork, 3),
        (Demand, TransitLeisure, 4), (Demand, Bike, 5), (Demand, Van, 6), (Demand, Truck, 7),
        (Demand, TrailerTruck, 8),
        (GenCost, CarWork, 40), (GenCost, CarLeisure, 41), (GenCost, Van, 46),
        (GenCost, Truck, 47), (GenCost, TrailerTruck, 48),
    ];
    let skimmed = [(CarWork, 0), (CarLeisure, 1), (TransitWork, 2), (TransitLeisure, 3),
                   (Bike, 4), (Walk, 5), (Van, 6), (Truck, 7), (TrailerTruck, 8)];
    for (class, offset) in skimmed.iter() {
        slots.push((Time, *class, 10 + offset));
        slots.push((Dist, *class, 20 + offset));
        if *class != Bike && *class != Walk {
            slots.push((Cost, *class, 30 + offset));
        }
    }
    let trip_parts = [FirstWait, TotalWait, InVehicleTime, AuxTime, NumBoardings, BoardTime,
                      BoardCost];
    for (base, class) in [(50, TransitWork), (60, TransitLeisure)].iter() {
        for (ii, kind) in trip_parts.iter().enumerate() {
            slots.push((*kind, *class, base + ii as u32));
        }
    }
    return slots;
}


/// Allocates the engine matrix ids of every (time period, kind, class) slot.
pub struct MatrixRegistry {
    slots: BTreeMap<(TimePeriod, MatrixKind, AssignmentClass), MatrixSlot>,
    save_matrices: bool,
}

impl MatrixRegistry {
    /// With save_matrices, each time period owns a block of 100 ids starting at
    /// first_matrix_id + 100 * period index.  Otherwise every period shares ids 0..99.
    pub fn new(save_matrices: bool, first_matrix_id: u32) -> MatrixRegistry {
        let mut slots = BTreeMap::new();
        for tp in TimePeriod::all().iter() {
            let (block_start, tag) = match save_matrices {
                true => (first_matrix_id + 100 * tp.index(), tp.as_str()),
                false => (0, ""),
            };
            for (kind, class, offset) in layout() {
                let slot = MatrixSlot {
                    id: MatrixId::new(block_start + offset),
                    name: format!("{}_{}_{}", kind.as_str(), class.as_str(), tag),
                    description: format!("{} {} {}", class.as_str().replace('_', " "),
                                         kind.description(), tag).trim_end().to_string(),
                    default_value: kind.default_value(),
                };
                slots.insert((*tp, kind, class), slot);
            }
        }
        return MatrixRegistry {slots, save_matrices};
    }

    pub fn saves_matrices(&self) -> bool {
        self.save_matrices
    }

    pub fn id(&self, tp: TimePeriod, kind: MatrixKind, class: AssignmentClass)
              -> Result<&MatrixId, AssignmentError> {
        match self.slots.get(&(tp, kind, class)) {
            Some(slot) => Ok(&slot.id),
            None => Err(AssignmentError::UnknownMatrix(
                format!("{} {} for {}", kind.as_str(), class.as_str(), tp))),
        }
    }

    pub fn get(&self, tp: TimePeriod, kind: MatrixKind, class: AssignmentClass)
               -> Option<&MatrixId> {
        self.slots.get(&(tp, kind, class)).map(|slot| &slot.id)
    }

    /// Classes that have a matrix of this kind, in a fixed order.
    pub fn classes(&self, tp: TimePeriod, kind: MatrixKind) -> Vec<AssignmentClass> {
        self.slots.keys().filter(|(stp, skind, _)| *stp == tp && *skind == kind)
                         .map(|(_, _, class)| *class).collect()
    }

    /// Slots that must be created in the engine.  Shared ids are only listed once.
    pub fn slots_to_create(&self) -> Vec<&MatrixSlot> {
        self.slots.iter()
            .filter(|((tp, _, _), _)| self.save_matrices || *tp == TimePeriod::Aht)
            .map(|(_, slot)| slot)
            .collect()
    }
}
