use std::path::Path;

use ndarray::prelude::*;

use super::AssignmentClass;
use super::AssignmentError;
use super::CongestionFunction;
use super::MatrixId;
use super::Network;
use super::StoppingCriteria;

pub type ScenarioId = u32;


/// One class of a traffic (car, freight or bike) assignment.  Result ids that are None are not
/// produced by the engine.
#[derive(PartialEq, Debug, Clone)]
pub struct TrafficClassSpec {
    pub class: AssignmentClass,
    pub mode: char,
    pub demand: MatrixId,
    pub gen_cost: Option<MatrixId>,
    pub cost: Option<MatrixId>,
    pub dist: Option<MatrixId>,
    pub time: Option<MatrixId>,
    // link attribute receiving this class's volumes
    pub link_volume: Option<String>,
}

#[derive(PartialEq, Debug, Clone)]
pub struct TrafficAssignmentSpec {
    pub classes: Vec<TrafficClassSpec>,
    pub stopping_criteria: StoppingCriteria,
    // reduced output: only car classes produce OD results
    pub lightweight: bool,
}

#[derive(PartialEq, Debug, Clone)]
pub struct PedestrianAssignmentSpec {
    pub modes: Vec<char>,
    pub demand: MatrixId,
    pub time: MatrixId,
    pub dist: MatrixId,
}

/// Where the engine writes the OD results of one transit class.
#[derive(PartialEq, Debug, Clone)]
pub struct TransitResultIds {
    pub total_impedance: Option<MatrixId>,
    pub first_wait: Option<MatrixId>,
    pub total_wait: Option<MatrixId>,
    pub in_vehicle_time: Option<MatrixId>,
    pub aux_time: Option<MatrixId>,
    pub num_boardings: Option<MatrixId>,
    pub board_time: Option<MatrixId>,
    pub dist: MatrixId,
    // accumulated boarding cost, only filled when counting fare zone boardings
    pub board_cost: Option<MatrixId>,
}

/// Transit segment attributes that receive one class's network results.
#[derive(PartialEq, Debug, Clone)]
pub struct TransitNetworkResults {
    pub transit_volumes: String,
    pub total_boardings: String,
    pub transfer_boardings: String,
}

impl TransitNetworkResults {
    pub fn for_class(class: AssignmentClass) -> TransitNetworkResults {
        TransitNetworkResults {
            transit_volumes: format!("@{}_vol", class),
            total_boardings: format!("@{}_boa", class),
            transfer_boardings: format!("@{}_trb", class),
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct TransitAssignmentSpec {
    pub class: AssignmentClass,
    pub modes: Vec<char>,
    pub demand: MatrixId,
    pub headway_fraction: f64,
    pub waiting_time_perception_factor: f64,
    pub extra_waiting_time_perception_factor: f64,
    pub aux_transit_perception_factor: f64,
    // node data1 is used as the boarding cost, so that the board cost result counts
    // boardings inside the tagged fare zone
    pub count_zone_boardings: bool,
    pub is_last_iteration: bool,
    pub results: TransitResultIds,
    pub network_results: Option<TransitNetworkResults>,
}


/// The network assignment engine.  It owns every scenario's network and all matrices; the
/// assignment layer only reads snapshots back and publishes whole networks.
///
/// Every call blocks until the engine is done.  Errors are never retried by the caller.
pub trait AssignmentEngine {
    fn create_matrix(&mut self, id: &MatrixId, name: &str, description: &str,
                     default_value: f64) -> Result<(), AssignmentError>;

    fn read_matrix(&self, id: &MatrixId) -> Result<Array2<f64>, AssignmentError>;

    fn write_matrix(&mut self, id: &MatrixId, matrix: &Array2<f64>)
                    -> Result<(), AssignmentError>;

    /// Zone numbers of the scenario, in the engine's matrix order.
    fn zone_numbers(&self, scenario: ScenarioId) -> Result<Vec<u32>, AssignmentError>;

    fn get_network(&self, scenario: ScenarioId) -> Result<Network, AssignmentError>;

    /// Replaces the scenario's network state with the given network.
    fn publish_network(&mut self, scenario: ScenarioId, network: Network)
                       -> Result<(), AssignmentError>;

    /// Loads volume-delay function definitions.
    fn process_functions(&mut self, function_file: &Path) -> Result<(), AssignmentError>;

    fn run_traffic_assignment(&mut self, spec: &TrafficAssignmentSpec, scenario: ScenarioId)
                              -> Result<(), AssignmentError>;

    fn run_pedestrian_assignment(&mut self, spec: &PedestrianAssignmentSpec,
                                 scenario: ScenarioId) -> Result<(), AssignmentError>;

    fn run_transit_assignment(&mut self, spec: &TransitAssignmentSpec, scenario: ScenarioId,
                              save_strategies: bool) -> Result<(), AssignmentError>;

    /// Joint equilibrium of several transit classes that share vehicle capacity.
    fn run_congested_transit_assignment(&mut self, specs: &[TransitAssignmentSpec],
                                        class_names: &[AssignmentClass],
                                        congestion_function: &CongestionFunction,
                                        stopping_criteria: &StoppingCriteria,
                                        scenario: ScenarioId) -> Result<(), AssignmentError>;
}
