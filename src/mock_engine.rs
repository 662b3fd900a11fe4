// An in-memory assignment engine.  It does no route choice: every assignment writes the skims it
// was given in advance, so that the orchestration can be run and inspected without a real
// network assignment engine.
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use ndarray::prelude::*;

use super::AssignmentClass;
use super::AssignmentEngine;
use super::AssignmentError;
use super::CongestionFunction;
use super::MatrixId;
use super::MatrixKind;
use super::Network;
use super::PedestrianAssignmentSpec;
use super::ScenarioId;
use super::StoppingCriteria;
use super::TrafficAssignmentSpec;
use super::TransitAssignmentSpec;


/// Every call that changes engine state, in call order.
#[derive(PartialEq, Debug, Clone)]
pub enum EngineCall {
    CreateMatrix(MatrixId),
    WriteMatrix(MatrixId),
    PublishNetwork(ScenarioId),
    ProcessFunctions(PathBuf),
    TrafficAssignment {
        scenario: ScenarioId,
        classes: Vec<AssignmentClass>,
        lightweight: bool,
        max_iterations: u32,
    },
    PedestrianAssignment(ScenarioId),
    TransitAssignment {
        scenario: ScenarioId,
        class: AssignmentClass,
        count_zone_boardings: bool,
        is_last_iteration: bool,
    },
    CongestedTransitAssignment {
        scenario: ScenarioId,
        classes: Vec<AssignmentClass>,
    },
}

pub struct MockEngine {
    nr_zones: Option<usize>,
    networks: BTreeMap<ScenarioId, Network>,
    matrices: HashMap<MatrixId, Array2<f64>>,
    skims: HashMap<(AssignmentClass, MatrixKind), Array2<f64>>,
    // link attribute -> volume written on every link by traffic assignments
    link_volumes: HashMap<String, f64>,
    // total car assignment volume written on every link
    auto_volume: Option<f64>,
    // class -> (volume, boardings, transfer boardings) written on every transit segment
    segment_results: HashMap<AssignmentClass, (f64, f64, f64)>,
    // (origin index, destination index) -> nodes where the trip boards
    boarding_nodes: HashMap<(usize, usize), Vec<u32>>,
    failing_operation: Option<String>,
    calls: Vec<EngineCall>,
}

impl MockEngine {
    pub fn new() -> MockEngine {
        MockEngine {
            nr_zones: None,
            networks: BTreeMap::new(),
            matrices: HashMap::new(),
            skims: HashMap::new(),
            link_volumes: HashMap::new(),
            auto_volume: None,
            segment_results: HashMap::new(),
            boarding_nodes: HashMap::new(),
            failing_operation: None,
            calls: vec![],
        }
    }

    /// Every scenario must have the same zones.
    pub fn add_scenario(&mut self, scenario: ScenarioId, network: Network)
                        -> Result<(), AssignmentError> {
        let nr_zones = network.zone_numbers().len();
        match self.nr_zones {
            Some(nn) if nn != nr_zones => return Err(AssignmentError::InvalidInput(
                format!("scenario {} has {} zones, other scenarios have {}", scenario, nr_zones,
                        nn))),
            _ => self.nr_zones = Some(nr_zones),
        }
        self.networks.insert(scenario, network);
        return Ok(());
    }

    /// Sets the OD result that every assignment of this class writes.
    pub fn set_skim(&mut self, class: AssignmentClass, kind: MatrixKind, skim: Array2<f64>) {
        self.skims.insert((class, kind), skim);
    }

    pub fn set_link_volume(&mut self, attribute: &str, volume: f64) {
        self.link_volumes.insert(String::from(attribute), volume);
    }

    pub fn set_auto_volume(&mut self, volume: f64) {
        self.auto_volume = Some(volume);
    }

    /// Sets the passengers, boardings and transfer boardings that every transit assignment of
    /// this class puts on each segment.
    pub fn set_segment_results(&mut self, class: AssignmentClass, volume: f64, boardings: f64,
                               transfer_boardings: f64) {
        self.segment_results.insert(class, (volume, boardings, transfer_boardings));
    }

    pub fn set_boarding_nodes(&mut self, origin: usize, destination: usize, nodes: Vec<u32>) {
        self.boarding_nodes.insert((origin, destination), nodes);
    }

    /// Makes every later call of the named operation fail.
    pub fn fail_on(&mut self, operation: &str) {
        self.failing_operation = Some(String::from(operation));
    }

    pub fn calls(&self) -> &[EngineCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn network(&self, scenario: ScenarioId) -> Option<&Network> {
        self.networks.get(&scenario)
    }

    pub fn matrix(&self, id: &MatrixId) -> Option<&Array2<f64>> {
        self.matrices.get(id)
    }

    fn check_operation(&self, operation: &str) -> Result<(), AssignmentError> {
        match &self.failing_operation {
            Some(failing) if failing == operation => Err(AssignmentError::Engine {
                operation: String::from(operation),
                message: String::from("simulated failure"),
            }),
            _ => Ok(()),
        }
    }

    fn check_scenario(&self, scenario: ScenarioId) -> Result<&Network, AssignmentError> {
        self.networks.get(&scenario).ok_or(AssignmentError::UnknownScenario(scenario))
    }

    fn store_skim(&mut self, class: AssignmentClass, kind: MatrixKind, id: &Option<MatrixId>)
                  -> Result<(), AssignmentError> {
        if let Some(id) = id {
            if let Some(skim) = self.skims.get(&(class, kind)) {
                let skim = skim.clone();
                self.store(id, skim)?;
            }
        }
        return Ok(());
    }

    fn store(&mut self, id: &MatrixId, matrix: Array2<f64>) -> Result<(), AssignmentError> {
        match self.matrices.get_mut(id) {
            Some(existing) if existing.dim() == matrix.dim() => {
                *existing = matrix;
                Ok(())
            }
            Some(existing) => Err(AssignmentError::InvalidInput(
                format!("matrix {} is {:?}, cannot store {:?}", id, existing.dim(),
                        matrix.dim()))),
            None => Err(AssignmentError::UnknownMatrix(id.to_string())),
        }
    }

    fn zone_boarding_cost(&self, scenario: ScenarioId) -> Result<Array2<f64>, AssignmentError> {
        let network = self.check_scenario(scenario)?;
        let nr_zones = network.zone_numbers().len();
        let mut board_cost = Array2::zeros((nr_zones, nr_zones));
        for ((origin, destination), nodes) in &self.boarding_nodes {
            if *origin >= nr_zones || *destination >= nr_zones {
                continue;
            }
            board_cost[[*origin, *destination]] = nodes.iter()
                .filter_map(|nn| network.node(*nn))
                .map(|node| node.data1)
                .sum();
        }
        return Ok(board_cost);
    }

    fn write_transit_results(&mut self, spec: &TransitAssignmentSpec, scenario: ScenarioId)
                             -> Result<(), AssignmentError> {
        let class = spec.class;
        let results = &spec.results;
        if spec.count_zone_boardings {
            if let Some(id) = &results.board_cost {
                let board_cost = self.zone_boarding_cost(scenario)?;
                self.store(id, board_cost)?;
            }
        } else {
            self.store_skim(class, MatrixKind::Time, &results.total_impedance)?;
            self.store_skim(class, MatrixKind::FirstWait, &results.first_wait)?;
            self.store_skim(class, MatrixKind::TotalWait, &results.total_wait)?;
            self.store_skim(class, MatrixKind::InVehicleTime, &results.in_vehicle_time)?;
            self.store_skim(class, MatrixKind::AuxTime, &results.aux_time)?;
            self.store_skim(class, MatrixKind::NumBoardings, &results.num_boardings)?;
            self.store_skim(class, MatrixKind::BoardTime, &results.board_time)?;
        }
        self.store_skim(class, MatrixKind::Dist, &Some(results.dist.clone()))?;
        return Ok(());
    }

    // Segment volumes are the sum over the assigned classes.  Per-class attributes are only
    // written for specs that ask for network results.
    fn write_segment_results(&mut self, specs: &[TransitAssignmentSpec], scenario: ScenarioId)
                             -> Result<(), AssignmentError> {
        let mut total_volume = None;
        let mut attributes = vec![];
        for spec in specs {
            if let Some((volume, boardings, transfers)) = self.segment_results.get(&spec.class) {
                total_volume = Some(total_volume.unwrap_or(0.) + volume);
                if let Some(names) = &spec.network_results {
                    attributes.push((names.transit_volumes.clone(), *volume));
                    attributes.push((names.total_boardings.clone(), *boardings));
                    attributes.push((names.transfer_boardings.clone(), *transfers));
                }
            }
        }
        let network = match self.networks.get_mut(&scenario) {
            Some(network) => network,
            None => return Err(AssignmentError::UnknownScenario(scenario)),
        };
        for line in network.transit_lines_mut() {
            for segment in &mut line.segments {
                if let Some(volume) = total_volume {
                    segment.transit_volume = volume;
                }
                for (attr, value) in &attributes {
                    segment.set_volume(attr, *value);
                }
            }
        }
        return Ok(());
    }
}

impl AssignmentEngine for MockEngine {
    fn create_matrix(&mut self, id: &MatrixId, name: &str, _description: &str,
                     default_value: f64) -> Result<(), AssignmentError> {
        self.check_operation("create_matrix")?;
        let nr_zones = match self.nr_zones {
            Some(nn) => nn,
            None => return Err(AssignmentError::Engine {
                operation: String::from("create_matrix"),
                message: format!("no scenario to size matrix {} ({}) by", id, name),
            }),
        };
        self.matrices.insert(id.clone(), Array2::from_elem((nr_zones, nr_zones), default_value));
        self.calls.push(EngineCall::CreateMatrix(id.clone()));
        return Ok(());
    }

    fn read_matrix(&self, id: &MatrixId) -> Result<Array2<f64>, AssignmentError> {
        match self.matrices.get(id) {
            Some(matrix) => Ok(matrix.clone()),
            None => Err(AssignmentError::UnknownMatrix(id.to_string())),
        }
    }

    fn write_matrix(&mut self, id: &MatrixId, matrix: &Array2<f64>)
                    -> Result<(), AssignmentError> {
        self.check_operation("write_matrix")?;
        self.store(id, matrix.clone())?;
        self.calls.push(EngineCall::WriteMatrix(id.clone()));
        return Ok(());
    }

    fn zone_numbers(&self, scenario: ScenarioId) -> Result<Vec<u32>, AssignmentError> {
        self.check_operation("zone_numbers")?;
        let network = self.check_scenario(scenario)?;
        return Ok(network.zone_numbers());
    }

    fn get_network(&self, scenario: ScenarioId) -> Result<Network, AssignmentError> {
        let network = self.check_scenario(scenario)?;
        return Ok(network.clone());
    }

    fn publish_network(&mut self, scenario: ScenarioId, network: Network)
                       -> Result<(), AssignmentError> {
        self.check_operation("publish_network")?;
        self.check_scenario(scenario)?;
        self.networks.insert(scenario, network);
        self.calls.push(EngineCall::PublishNetwork(scenario));
        return Ok(());
    }

    fn process_functions(&mut self, function_file: &Path) -> Result<(), AssignmentError> {
        self.check_operation("process_functions")?;
        self.calls.push(EngineCall::ProcessFunctions(function_file.to_path_buf()));
        return Ok(());
    }

    fn run_traffic_assignment(&mut self, spec: &TrafficAssignmentSpec, scenario: ScenarioId)
                              -> Result<(), AssignmentError> {
        self.check_operation("traffic_assignment")?;
        self.check_scenario(scenario)?;
        for class_spec in &spec.classes {
            self.read_matrix(&class_spec.demand)?;
            let class = class_spec.class;
            self.store_skim(class, MatrixKind::GenCost, &class_spec.gen_cost)?;
            self.store_skim(class, MatrixKind::Cost, &class_spec.cost)?;
            self.store_skim(class, MatrixKind::Dist, &class_spec.dist)?;
            self.store_skim(class, MatrixKind::Time, &class_spec.time)?;
        }

        let volumes: Vec<(String, f64)> = spec.classes.iter()
            .filter_map(|cs| cs.link_volume.as_ref())
            .filter_map(|attr| self.link_volumes.get(attr).map(|vv| (attr.clone(), *vv)))
            .collect();
        let auto_volume = match spec.classes.iter().any(|cs| cs.class.is_car()) {
            true => self.auto_volume,
            false => None,
        };
        if let Some(network) = self.networks.get_mut(&scenario) {
            for (_, _, link) in network.links_mut() {
                for (attr, volume) in &volumes {
                    link.set_volume(attr, *volume);
                }
                if let Some(volume) = auto_volume {
                    link.auto_volume = volume;
                }
            }
        }

        self.calls.push(EngineCall::TrafficAssignment {
            scenario,
            classes: spec.classes.iter().map(|cs| cs.class).collect(),
            lightweight: spec.lightweight,
            max_iterations: spec.stopping_criteria.max_iterations,
        });
        return Ok(());
    }

    fn run_pedestrian_assignment(&mut self, spec: &PedestrianAssignmentSpec,
                                 scenario: ScenarioId) -> Result<(), AssignmentError> {
        self.check_operation("pedestrian_assignment")?;
        self.check_scenario(scenario)?;
        self.read_matrix(&spec.demand)?;
        self.store_skim(AssignmentClass::Walk, MatrixKind::Time, &Some(spec.time.clone()))?;
        self.store_skim(AssignmentClass::Walk, MatrixKind::Dist, &Some(spec.dist.clone()))?;
        self.calls.push(EngineCall::PedestrianAssignment(scenario));
        return Ok(());
    }

    fn run_transit_assignment(&mut self, spec: &TransitAssignmentSpec, scenario: ScenarioId,
                              _save_strategies: bool) -> Result<(), AssignmentError> {
        self.check_operation("transit_assignment")?;
        self.check_scenario(scenario)?;
        self.read_matrix(&spec.demand)?;
        self.write_transit_results(spec, scenario)?;
        self.write_segment_results(std::slice::from_ref(spec), scenario)?;
        self.calls.push(EngineCall::TransitAssignment {
            scenario,
            class: spec.class,
            count_zone_boardings: spec.count_zone_boardings,
            is_last_iteration: spec.is_last_iteration,
        });
        return Ok(());
    }

    fn run_congested_transit_assignment(&mut self, specs: &[TransitAssignmentSpec],
                                        class_names: &[AssignmentClass],
                                        _congestion_function: &CongestionFunction,
                                        _stopping_criteria: &StoppingCriteria,
                                        scenario: ScenarioId) -> Result<(), AssignmentError> {
        self.check_operation("congested_transit_assignment")?;
        self.check_scenario(scenario)?;
        if specs.len() != class_names.len() {
            return Err(AssignmentError::Engine {
                operation: String::from("congested_transit_assignment"),
                message: format!("{} specifications for {} classes", specs.len(),
                                 class_names.len()),
            });
        }
        for spec in specs {
            self.read_matrix(&spec.demand)?;
            self.write_transit_results(spec, scenario)?;
        }
        self.write_segment_results(specs, scenario)?;
        self.calls.push(EngineCall::CongestedTransitAssignment {
            scenario,
            classes: class_names.to_vec(),
        });
        return Ok(());
    }
}


#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use super::super::{Link, Node, TransitLine, TransitNetworkResults, TransitResultIds,
                       TransitSegment};

    fn engine() -> MockEngine {
        let mut network = Network::new();
        network.add_node(Node::new(1, "A", true));
        network.add_node(Node::new(2, "B", true));
        network.add_node(Node::new(10, "B", false));
        network.add_link(1, 10, Link::new(1., 1)).unwrap();
        let mut engine = MockEngine::new();
        engine.add_scenario(21, network).unwrap();
        engine
    }

    fn transit_spec(class: AssignmentClass, count_zone_boardings: bool) -> TransitAssignmentSpec {
        TransitAssignmentSpec {
            class,
            modes: vec!['b'],
            demand: MatrixId::new(1),
            headway_fraction: 0.5,
            waiting_time_perception_factor: 1.5,
            extra_waiting_time_perception_factor: 3.5,
            aux_transit_perception_factor: 1.75,
            count_zone_boardings,
            is_last_iteration: false,
            results: TransitResultIds {
                total_impedance: None,
                first_wait: None,
                total_wait: None,
                in_vehicle_time: None,
                aux_time: None,
                num_boardings: None,
                board_time: None,
                dist: MatrixId::new(2),
                board_cost: Some(MatrixId::new(3)),
            },
            network_results: None,
        }
    }

    #[test]
    fn test_matrices_need_creating() {
        let mut engine = engine();
        let id = MatrixId::new(5);
        assert!(engine.write_matrix(&id, &Array2::zeros((2, 2))).is_err());
        engine.create_matrix(&id, "demand", "demand", 0.).unwrap();
        assert!(engine.write_matrix(&id, &Array2::zeros((3, 3))).is_err());
        engine.write_matrix(&id, &Array2::ones((2, 2))).unwrap();
        assert_eq!(engine.read_matrix(&id).unwrap(), Array2::ones((2, 2)));
        assert!(engine.read_matrix(&MatrixId::new(6)).is_err());
    }

    #[test]
    fn test_scenarios_share_zones() {
        let mut engine = engine();
        let mut network = Network::new();
        network.add_node(Node::new(1, "A", true));
        assert!(engine.add_scenario(22, network).is_err());
        assert_eq!(engine.zone_numbers(21).unwrap(), vec![1, 2]);
        assert!(engine.get_network(19).is_err());
    }

    #[test]
    fn test_zone_boardings_count_tagged_nodes() {
        let mut engine = engine();
        for number in 1..4 {
            engine.create_matrix(&MatrixId::new(number), "", "", 0.).unwrap();
        }
        engine.set_boarding_nodes(0, 1, vec![1, 10]);
        engine.set_boarding_nodes(1, 0, vec![2]);
        let mut network = engine.get_network(21).unwrap();
        for node in network.nodes_mut() {
            node.data1 = if node.label == "B" { 1. } else { 0. };
        }
        engine.publish_network(21, network).unwrap();

        let spec = transit_spec(AssignmentClass::TransitWork, true);
        engine.run_transit_assignment(&spec, 21, true).unwrap();
        let board_cost = engine.read_matrix(&MatrixId::new(3)).unwrap();
        assert_eq!(board_cost, array![[0., 1.], [1., 0.]]);

        engine.fail_on("transit_assignment");
        assert!(engine.run_transit_assignment(&spec, 21, true).is_err());
        let nr_assignments = engine.calls().iter().filter(|cc| match cc {
            EngineCall::TransitAssignment {..} => true,
            _ => false,
        }).count();
        assert_eq!(nr_assignments, 1);
    }

    #[test]
    fn test_segment_results() {
        let mut engine = engine();
        for number in 1..4 {
            engine.create_matrix(&MatrixId::new(number), "", "", 0.).unwrap();
        }
        let mut network = engine.get_network(21).unwrap();
        let line = TransitLine::new("1001", 'b', 10., vec![TransitSegment::new(1, 10, 1, 0., 0.)]);
        network.add_transit_line(line).unwrap();
        engine.publish_network(21, network).unwrap();
        engine.set_segment_results(AssignmentClass::TransitWork, 8., 3., 1.);
        engine.set_segment_results(AssignmentClass::TransitLeisure, 2., 1., 0.);

        engine.run_transit_assignment(&transit_spec(AssignmentClass::TransitWork, false), 21,
                                      true).unwrap();
        let segment = &engine.network(21).unwrap().transit_lines()[0].segments[0];
        assert_eq!(segment.transit_volume, 8.);
        assert!(segment.volumes.is_empty());

        let specs: Vec<TransitAssignmentSpec> = AssignmentClass::transit_classes().iter()
            .map(|class| TransitAssignmentSpec {
                network_results: Some(TransitNetworkResults::for_class(*class)),
                ..transit_spec(*class, false)
            })
            .collect();
        engine.run_congested_transit_assignment(
            &specs, &AssignmentClass::transit_classes(), &CongestionFunction::default(),
            &StoppingCriteria::fine(), 21).unwrap();
        let segment = &engine.network(21).unwrap().transit_lines()[0].segments[0];
        assert_eq!(segment.transit_volume, 10.);
        assert_eq!(segment.volume("@transit_work_vol"), 8.);
        assert_eq!(segment.volume("@transit_work_trb"), 1.);
        assert_eq!(segment.volume("@transit_leisure_boa"), 1.);
    }
}
