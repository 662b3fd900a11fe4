// imports of other modules from this crate
mod error;
pub use error::AssignmentError;

mod classes;
pub use classes::{AssignmentClass, ImpedanceType, Purpose, TimePeriod};

mod config;
pub use config::{AssignmentConfig, CongestionFunction, HeadwaySdParams, StoppingCriteria,
                 ZoneRange};

mod network;
pub use network::{Link, Network, Node, TransitLine, TransitSegment};

mod matrices;
pub use matrices::{MatrixId, MatrixKind, MatrixRegistry, MatrixSlot, UNREACHABLE};

mod engine;
pub use engine::{AssignmentEngine, PedestrianAssignmentSpec, ScenarioId, TrafficAssignmentSpec,
                 TrafficClassSpec, TransitAssignmentSpec, TransitNetworkResults,
                 TransitResultIds};

pub mod network_attributes;

pub mod impedance;
pub use impedance::{ImpedanceMatrices, ImpedanceProcessor};

pub mod fare_zones;
pub use fare_zones::FareTable;

pub mod day_results;
pub use day_results::NetworkKms;

mod assignment;
pub use assignment::{link_volume_attribute, AssignmentModel, IterationStage, PeriodState};

pub mod mock_engine;
pub use mock_engine::{EngineCall, MockEngine};

#[cfg(test)]
mod test_utils;
