// The assignment controller: writes demand into the engine, runs the assignments that an
// iteration stage calls for and turns the results into impedance matrices.
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use ndarray::prelude::*;
use rayon::prelude::*;

use super::day_results::{self, KmFactors, NetworkKms};
use super::fare_zones::{self, FareTable, ZoneVisits};
use super::impedance::{ClassMatrices, ImpedanceMatrices, ImpedanceProcessor, RawImpedance};
use super::network_attributes;
use super::AssignmentClass;
use super::AssignmentConfig;
use super::AssignmentEngine;
use super::AssignmentError;
use super::ImpedanceType;
use super::MatrixKind;
use super::MatrixRegistry;
use super::Network;
use super::PedestrianAssignmentSpec;
use super::Purpose;
use super::ScenarioId;
use super::StoppingCriteria;
use super::TimePeriod;
use super::TrafficAssignmentSpec;
use super::TrafficClassSpec;
use super::TransitAssignmentSpec;
use super::TransitNetworkResults;
use super::TransitResultIds;


/// Where the outer model's convergence loop is.  Each stage runs a different sequence of
/// assignments.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum IterationStage {
    Initial,
    /// iteration 0
    Early,
    /// iteration 1
    Stabilizing,
    /// iterations from 2 on
    Refining(u32),
    Final,
}

impl IterationStage {
    pub fn from_iteration(iteration: i64) -> Result<IterationStage, AssignmentError> {
        match iteration {
            0 => Ok(IterationStage::Early),
            1 => Ok(IterationStage::Stabilizing),
            ii if ii > 1 && ii <= u32::MAX as i64 => Ok(IterationStage::Refining(ii as u32)),
            _ => Err(AssignmentError::InvalidIterationStage(iteration.to_string())),
        }
    }

    pub fn is_final(&self) -> bool {
        *self == IterationStage::Final
    }

    fn validate(&self) -> Result<(), AssignmentError> {
        match self {
            IterationStage::Refining(ii) if *ii <= 1 => Err(
                AssignmentError::InvalidIterationStage(format!("refining iteration {}", ii))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for IterationStage {
    fn fmt(&self, ff: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IterationStage::Initial => write!(ff, "init"),
            IterationStage::Early => write!(ff, "0"),
            IterationStage::Stabilizing => write!(ff, "1"),
            IterationStage::Refining(ii) => write!(ff, "{}", ii),
            IterationStage::Final => write!(ff, "last"),
        }
    }
}

impl FromStr for IterationStage {
    type Err = AssignmentError;

    fn from_str(ss: &str) -> Result<IterationStage, AssignmentError> {
        match ss {
            "init" => Ok(IterationStage::Initial),
            "last" => Ok(IterationStage::Final),
            _ => match ss.parse::<i64>() {
                Ok(iteration) => IterationStage::from_iteration(iteration),
                Err(_) => Err(AssignmentError::InvalidIterationStage(String::from(ss))),
            },
        }
    }
}


/// Network state of one time period that depends on the stages run so far.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub struct PeriodState {
    // freight volumes are part of the background traffic
    pub freight_in_background: bool,
}

impl PeriodState {
    /// Freight is folded into background traffic after the stabilizing stage and stays there
    /// for the rest of the run.
    pub fn after_stage(self, stage: IterationStage) -> PeriodState {
        match stage {
            IterationStage::Stabilizing => PeriodState {freight_in_background: true},
            _ => self,
        }
    }
}


// assignment specifications that only depend on the time period
struct PeriodSpecs {
    cars: TrafficAssignmentSpec,
    cars_lightweight: TrafficAssignmentSpec,
    bikes: TrafficAssignmentSpec,
    pedestrians: PedestrianAssignmentSpec,
    transit: BTreeMap<AssignmentClass, TransitAssignmentSpec>,
    final_transit: Vec<TransitAssignmentSpec>,
    fare_zone_boardings: TransitAssignmentSpec,
}


/// Link attribute that receives the volumes of a traffic class.
pub fn link_volume_attribute(class: AssignmentClass) -> String {
    format!("@{}", class.as_str())
}

fn bike_volume_attribute(tp: TimePeriod) -> String {
    format!("@bike_{}", tp)
}

static DAY_BIKE_VOLUME: &str = "@bike_day";


pub struct AssignmentModel<E: AssignmentEngine> {
    engine: E,
    cfg: AssignmentConfig,
    registry: MatrixRegistry,
    period_states: BTreeMap<TimePeriod, PeriodState>,
    specs: BTreeMap<TimePeriod, PeriodSpecs>,
    // read once by prepare_network
    zone_numbers: Option<Vec<u32>>,
}

impl<E: AssignmentEngine> AssignmentModel<E> {
    pub fn new(engine: E, cfg: AssignmentConfig) -> Result<AssignmentModel<E>, AssignmentError> {
        cfg.validate()?;
        let registry = MatrixRegistry::new(cfg.save_matrices, cfg.first_matrix_id);
        return Ok(AssignmentModel {
            engine,
            cfg,
            registry,
            period_states: BTreeMap::new(),
            specs: BTreeMap::new(),
            zone_numbers: None,
        });
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    pub fn config(&self) -> &AssignmentConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &MatrixRegistry {
        &self.registry
    }

    pub fn scenario(&self, tp: TimePeriod) -> ScenarioId {
        self.cfg.first_scenario_id + tp.index() + 2
    }

    pub fn period_state(&self, tp: TimePeriod) -> PeriodState {
        match self.period_states.get(&tp) {
            Some(state) => *state,
            None => PeriodState::default(),
        }
    }

    /// Zone numbers in matrix order.
    pub fn zone_numbers(&self) -> Result<Vec<u32>, AssignmentError> {
        match &self.zone_numbers {
            Some(zone_numbers) => Ok(zone_numbers.clone()),
            None => self.engine.zone_numbers(self.scenario(TimePeriod::Aht)),
        }
    }

    /// Zone number -> matrix index.
    pub fn mapping(&self) -> Result<HashMap<u32, usize>, AssignmentError> {
        let zone_numbers = self.zone_numbers()?;
        return Ok(zone_numbers.into_iter().enumerate().map(|(ii, zz)| (zz, ii)).collect());
    }

    pub fn nr_zones(&self) -> Result<usize, AssignmentError> {
        Ok(self.zone_numbers()?.len())
    }

    /// Creates all matrices and computes road costs, boarding penalties and background traffic
    /// of every time period's scenario.
    pub fn prepare_network(&mut self) -> Result<(), AssignmentError> {
        let zone_numbers = self.engine.zone_numbers(self.scenario(TimePeriod::Aht))?;
        log::debug!("Assigning {} zones", zone_numbers.len());
        self.zone_numbers = Some(zone_numbers);
        let slots: Vec<_> = self.registry.slots_to_create().into_iter().cloned().collect();
        for slot in slots {
            self.engine.create_matrix(&slot.id, &slot.name, &slot.description,
                                      slot.default_value)?;
        }
        log::debug!("Created {} matrices", self.registry.slots_to_create().len());

        for tp in TimePeriod::all().iter() {
            let scenario = self.scenario(*tp);
            log::info!("Calculates road charges for scenario {}", scenario);
            let mut network = self.engine.get_network(scenario)?;
            network_attributes::calc_road_cost(&mut network, self.cfg.dist_unit_cost);
            network_attributes::calc_boarding_penalties(&mut network, &self.cfg.boarding_penalty,
                                                        0.);
            let state = self.period_state(*tp);
            network_attributes::calc_background_traffic(&mut network,
                                                        state.freight_in_background);
            self.engine.publish_network(scenario, network)?;
        }
        return Ok(());
    }

    /// Assigns one time period at the given stage and returns its impedance matrices.
    ///
    /// The network must have been prepared.  Demand is checked for shape, NaNs and negative
    /// values before the engine is called at all.  Outside the final stage, transit leisure
    /// impedances are copies of the transit work ones and freight impedances are not returned.
    pub fn assign(&mut self, tp: TimePeriod, demand: &HashMap<AssignmentClass, Array2<f64>>,
                  stage: IterationStage) -> Result<ImpedanceMatrices, AssignmentError> {
        stage.validate()?;
        log::info!("Assignment of {} starts at iteration {}", tp, stage);
        let nr_zones = match &self.zone_numbers {
            Some(zone_numbers) => zone_numbers.len(),
            None => return Err(AssignmentError::InvalidInput(
                String::from("the network must be prepared before assignment"))),
        };
        let registry = &self.registry;
        validate_demand(demand, nr_zones,
                        |class| registry.get(tp, MatrixKind::Demand, class).is_some())?;
        self.ensure_specs(tp)?;
        self.commit_demand(tp, demand, stage.is_final())?;

        let scenario = self.scenario(tp);
        match stage {
            IterationStage::Initial => {
                self.assign_pedestrians(tp)?;
                self.assign_bikes(tp)?;
                self.assign_cars(tp, false, false)?;
                self.calc_extra_wait_time(scenario)?;
                self.assign_transit(tp)?;
            }
            IterationStage::Early => {
                self.assign_cars(tp, false, false)?;
                self.calc_extra_wait_time(scenario)?;
                self.assign_transit(tp)?;
            }
            IterationStage::Stabilizing => {
                self.assign_cars(tp, false, false)?;
                self.calc_extra_wait_time(scenario)?;
                self.assign_transit(tp)?;
                let state = self.period_state(tp).after_stage(stage);
                self.period_states.insert(tp, state);
                self.calc_background_traffic(tp)?;
            }
            IterationStage::Refining(_) => {
                self.assign_cars(tp, false, true)?;
                self.calc_extra_wait_time(scenario)?;
                self.assign_transit(tp)?;
            }
            IterationStage::Final => {
                self.calc_background_traffic(tp)?;
                self.assign_cars(tp, true, false)?;
                let mut network = self.engine.get_network(scenario)?;
                network_attributes::calc_boarding_penalties(
                    &mut network, &self.cfg.last_boarding_penalty, 0.);
                self.engine.publish_network(scenario, network)?;
                self.calc_extra_wait_time(scenario)?;
                self.assign_congested_transit(tp)?;
                self.assign_bikes(tp)?;
            }
        }

        let raw = self.read_raw_impedance(tp, stage.is_final())?;
        let processor = ImpedanceProcessor {
            dist_unit_cost: self.cfg.dist_unit_cost,
            waiting_time_perception_factor: self.cfg.waiting_time_perception_factor,
            vot_inv: vec![
                (AssignmentClass::CarWork, self.cfg.vot_inv(Purpose::Work)),
                (AssignmentClass::CarLeisure, self.cfg.vot_inv(Purpose::Leisure)),
            ].into_iter().collect(),
        };
        let impedance = processor.process(raw, stage.is_final())?;
        log::info!("Assignment of {} done at iteration {}", tp, stage);
        return Ok(impedance);
    }

    /// Infers the transit fare of every OD pair from the fare zones its paths visit and writes
    /// it into the transit cost matrices of every time period.  With default_cost, that matrix
    /// is written instead and no fare zone visits are traced.
    pub fn calc_transit_cost(&mut self, fares: &FareTable, peripheral_cost: &Array2<f64>,
                             default_cost: Option<&Array2<f64>>) -> Result<(), AssignmentError> {
        let zone_numbers = self.zone_numbers()?;
        let nr_zones = zone_numbers.len();
        if let Some(cost) = default_cost {
            if cost.dim() != (nr_zones, nr_zones) {
                return Err(AssignmentError::InvalidInput(
                    format!("default transit cost is {:?} for {} zones", cost.dim(), nr_zones)));
            }
            log::info!("Using a fixed transit cost matrix");
            return self.write_transit_cost(cost);
        }
        fares.check_municipalities(&self.cfg.municipalities)?;

        let tp = TimePeriod::Aht;
        let scenario = self.scenario(tp);
        self.ensure_specs(tp)?;
        let mut network = self.engine.get_network(scenario)?;
        network_attributes::calc_boarding_penalties(&mut network, &self.cfg.boarding_penalty,
                                                    self.cfg.fare_zone_extra_penalty);
        let labels = network.fare_zone_labels();
        fare_zones::check_zone_labels(&labels, fares);

        let mut destination_labels = vec![];
        for zone in &zone_numbers {
            match network.node(*zone) {
                Some(node) => destination_labels.push(node.label.clone()),
                None => return Err(AssignmentError::InvalidInput(
                    format!("zone {} has no centroid in scenario {}", zone, scenario))),
            }
        }

        log::info!("Tracing visits of {} fare zones in scenario {}", labels.len(), scenario);
        let zone_visits = labels.iter().map(|label| -> Result<_, AssignmentError> {
            let visited = self.trace_fare_zone(&mut network, label, scenario)?;
            Ok((label.clone(), visited))
        });
        let mut visits = ZoneVisits::collect(nr_zones, zone_visits)?;
        visits.mark_destination_zones(&destination_labels)?;

        let dist_id = self.registry.id(tp, MatrixKind::Dist, AssignmentClass::TransitWork)?;
        let dist = self.engine.read_matrix(dist_id)?;
        let mut cost = fare_zones::resolve_fares(&visits, fares, &zone_numbers,
                                                 &self.cfg.municipalities, &dist)?;
        fare_zones::apply_peripheral_cost(&mut cost, &zone_numbers, &self.cfg.peripheral_zones,
                                          peripheral_cost)?;
        self.write_transit_cost(&cost)?;

        // the engine's network holds the results of the tracing assignments
        let mut network = self.engine.get_network(scenario)?;
        for node in network.nodes_mut() {
            node.data1 = 0.;
        }
        network_attributes::calc_boarding_penalties(&mut network, &self.cfg.boarding_penalty,
                                                    0.);
        self.engine.publish_network(scenario, network)?;
        log::info!("Transit costs calculated");
        return Ok(());
    }

    /// Expands the period results to the day scenario and returns the day's vehicle and transit
    /// kilometres.  Car and freight link volumes and the transit segment results go to the day
    /// scenario, bike volumes to @bike_day of the bike scenario.  Transit results are also
    /// totalled onto links and nodes of every period.  Run after the last iteration.
    pub fn aggregate_results(&mut self) -> Result<NetworkKms, AssignmentError> {
        let mut periods = vec![];
        for tp in TimePeriod::all().iter() {
            periods.push((*tp, self.engine.get_network(self.scenario(*tp))?));
        }
        let day_scenario = self.cfg.day_scenario();
        let mut day = self.engine.get_network(day_scenario)?;

        let traffic_classes = [
            AssignmentClass::CarWork,
            AssignmentClass::CarLeisure,
            AssignmentClass::Van,
            AssignmentClass::Truck,
            AssignmentClass::TrailerTruck,
        ];
        for class in traffic_classes.iter() {
            let weighted = self.weighted(&periods, class.as_str())?;
            let attr = link_volume_attribute(*class);
            let volumes = day_results::sum_link_volumes(&weighted, &attr);
            day_results::set_link_volumes(&mut day, &attr, &volumes);
            log::info!("Link attribute {} aggregated to 24h (scenario {})", attr, day_scenario);
        }
        for class in AssignmentClass::transit_classes().iter() {
            let weighted = self.weighted(&periods, class.as_str())?;
            let names = TransitNetworkResults::for_class(*class);
            for attr in &[names.transit_volumes, names.total_boardings, names.transfer_boardings] {
                let volumes = day_results::sum_segment_volumes(&weighted, attr);
                day_results::set_segment_volumes(&mut day, attr, &volumes);
                log::info!("Transit attribute {} aggregated to 24h (scenario {})", attr,
                           day_scenario);
            }
        }

        let bike_scenario = self.cfg.bike_scenario();
        let mut bikes = self.engine.get_network(bike_scenario)?;
        let mut bike_volumes: HashMap<(u32, u32), f64> = HashMap::new();
        for tp in TimePeriod::all().iter() {
            let factor = self.cfg.volume_factor("bike", *tp)?;
            let attr = bike_volume_attribute(*tp);
            for (inode, jnode, link) in bikes.links() {
                *bike_volumes.entry((inode, jnode)).or_insert(0.) += link.volume(&attr) * factor;
            }
        }
        day_results::set_link_volumes(&mut bikes, DAY_BIKE_VOLUME, &bike_volumes);
        log::info!("Bike attribute {} aggregated to 24h (scenario {})", DAY_BIKE_VOLUME,
                   bike_scenario);

        let transit_classes = AssignmentClass::transit_classes();
        let mut kms = NetworkKms::new();
        for (tp, network) in periods.iter_mut() {
            day_results::sum_transit_results(network, &transit_classes);
            let factors = KmFactors {
                car: self.cfg.volume_factor("car", *tp)?,
                van: self.cfg.volume_factor(AssignmentClass::Van.as_str(), *tp)?,
                truck: self.cfg.volume_factor(AssignmentClass::Truck.as_str(), *tp)?,
                trailer_truck: self.cfg.volume_factor(AssignmentClass::TrailerTruck.as_str(),
                                                      *tp)?,
                bus: self.cfg.volume_factor("bus", *tp)?,
            };
            kms.add_period(network, &factors)?;
        }
        day_results::sum_transit_results(&mut day, &transit_classes);

        self.engine.publish_network(bike_scenario, bikes)?;
        for (tp, network) in periods {
            self.engine.publish_network(self.scenario(tp), network)?;
        }
        self.engine.publish_network(day_scenario, day)?;
        for (name, by_vdf) in &kms.vehicle_kms {
            log::info!("Vehicle kms of {}: {:.0}", name, by_vdf.values().sum::<f64>());
        }
        log::info!("Transit kms: {:.0}", kms.transit_dists.values().sum::<f64>());
        return Ok(kms);
    }

    // Each period's network with the day expansion factor of the named volumes.
    fn weighted<'a>(&self, periods: &'a [(TimePeriod, Network)], name: &str)
                    -> Result<Vec<(&'a Network, f64)>, AssignmentError> {
        let mut weighted = vec![];
        for (tp, network) in periods {
            weighted.push((network, self.cfg.volume_factor(name, *tp)?));
        }
        return Ok(weighted);
    }

    // Tags the nodes of one fare zone as boarding cost and returns the OD pairs whose paths
    // board inside it.
    fn trace_fare_zone(&mut self, network: &mut Network, label: &str, scenario: ScenarioId)
                       -> Result<Array2<bool>, AssignmentError> {
        for node in network.nodes_mut() {
            node.data1 = if node.label == label { 1. } else { 0. };
        }
        self.engine.publish_network(scenario, network.clone())?;
        let spec = match self.specs.get(&TimePeriod::Aht) {
            Some(specs) => &specs.fare_zone_boardings,
            None => return Err(AssignmentError::InvalidInput(
                String::from("assignment specifications are missing"))),
        };
        log::debug!("Tracing visits of fare zone {}", label);
        self.engine.run_transit_assignment(spec, scenario, true)?;
        let board_cost_id = match &spec.results.board_cost {
            Some(id) => id,
            None => return Err(AssignmentError::UnknownMatrix(
                String::from("transit work board cost"))),
        };
        let nr_visits = self.engine.read_matrix(board_cost_id)?;
        return Ok(nr_visits.mapv(|vv| vv >= 1.));
    }

    fn write_transit_cost(&mut self, cost: &Array2<f64>) -> Result<(), AssignmentError> {
        for tp in TimePeriod::all().iter() {
            for class in AssignmentClass::transit_classes().iter() {
                let id = self.registry.id(*tp, MatrixKind::Cost, *class)?;
                self.engine.write_matrix(id, cost)?;
            }
        }
        return Ok(());
    }

    fn commit_demand(&mut self, tp: TimePeriod, demand: &HashMap<AssignmentClass, Array2<f64>>,
                     is_final: bool) -> Result<(), AssignmentError> {
        let mut transit_sum: Option<Array2<f64>> = None;
        for class in AssignmentClass::all().iter() {
            let matrix = match demand.get(class) {
                Some(matrix) => matrix,
                None => continue,
            };
            if class.is_transit() && !is_final {
                // both transit classes are assigned as one before the last iteration
                transit_sum = match transit_sum {
                    Some(sum) => Some(sum + matrix),
                    None => Some(matrix.clone()),
                };
                continue;
            }
            let id = self.registry.id(tp, MatrixKind::Demand, *class)?;
            self.engine.write_matrix(id, matrix)?;
        }
        if let Some(sum) = transit_sum {
            let id = self.registry.id(tp, MatrixKind::Demand, AssignmentClass::TransitWork)?;
            self.engine.write_matrix(id, &sum)?;
        }
        return Ok(());
    }

    fn ensure_specs(&mut self, tp: TimePeriod) -> Result<(), AssignmentError> {
        if !self.specs.contains_key(&tp) {
            let specs = self.build_specs(tp)?;
            self.specs.insert(tp, specs);
        }
        return Ok(());
    }

    fn specs(&self, tp: TimePeriod) -> Result<&PeriodSpecs, AssignmentError> {
        self.specs.get(&tp).ok_or_else(|| AssignmentError::InvalidInput(
            format!("assignment specifications of {} are missing", tp)))
    }

    fn build_specs(&self, tp: TimePeriod) -> Result<PeriodSpecs, AssignmentError> {
        let reg = &self.registry;
        let car_classes = [
            (AssignmentClass::CarWork, self.cfg.car_mode),
            (AssignmentClass::CarLeisure, self.cfg.car_mode),
            (AssignmentClass::Van, self.cfg.van_mode),
            (AssignmentClass::Truck, self.cfg.truck_mode),
            (AssignmentClass::TrailerTruck, self.cfg.trailer_truck_mode),
        ];
        let mut classes = vec![];
        let mut lightweight_classes = vec![];
        for (class, mode) in car_classes.iter() {
            let spec = TrafficClassSpec {
                class: *class,
                mode: *mode,
                demand: reg.id(tp, MatrixKind::Demand, *class)?.clone(),
                gen_cost: Some(reg.id(tp, MatrixKind::GenCost, *class)?.clone()),
                cost: Some(reg.id(tp, MatrixKind::Cost, *class)?.clone()),
                dist: Some(reg.id(tp, MatrixKind::Dist, *class)?.clone()),
                time: Some(reg.id(tp, MatrixKind::Time, *class)?.clone()),
                link_volume: Some(link_volume_attribute(*class)),
            };
            if class.is_car() {
                lightweight_classes.push(spec.clone());
            } else {
                // freight still loads the network but skips its OD results
                lightweight_classes.push(TrafficClassSpec {
                    gen_cost: None,
                    cost: None,
                    dist: None,
                    time: None,
                    ..spec.clone()
                });
            }
            classes.push(spec);
        }
        let cars = TrafficAssignmentSpec {
            classes,
            stopping_criteria: self.cfg.stopping_criteria_coarse.clone(),
            lightweight: false,
        };
        let cars_lightweight = TrafficAssignmentSpec {
            classes: lightweight_classes,
            stopping_criteria: self.cfg.stopping_criteria_coarse.clone(),
            lightweight: true,
        };

        let bike = AssignmentClass::Bike;
        let bikes = TrafficAssignmentSpec {
            classes: vec![TrafficClassSpec {
                class: bike,
                mode: self.cfg.bike_mode,
                demand: reg.id(tp, MatrixKind::Demand, bike)?.clone(),
                gen_cost: None,
                cost: None,
                dist: Some(reg.id(tp, MatrixKind::Dist, bike)?.clone()),
                time: Some(reg.id(tp, MatrixKind::Time, bike)?.clone()),
                link_volume: Some(bike_volume_attribute(tp)),
            }],
            stopping_criteria: StoppingCriteria::single_pass(),
            lightweight: false,
        };

        let pedestrians = PedestrianAssignmentSpec {
            modes: self.cfg.aux_modes.clone(),
            demand: reg.id(tp, MatrixKind::Demand, bike)?.clone(),
            time: reg.id(tp, MatrixKind::Time, AssignmentClass::Walk)?.clone(),
            dist: reg.id(tp, MatrixKind::Dist, AssignmentClass::Walk)?.clone(),
        };

        let mut transit = BTreeMap::new();
        let mut final_transit = vec![];
        for class in AssignmentClass::transit_classes().iter() {
            transit.insert(*class, self.transit_spec(tp, *class, false, false)?);
            let mut final_spec = self.transit_spec(tp, *class, false, true)?;
            final_spec.network_results = Some(TransitNetworkResults::for_class(*class));
            final_transit.push(final_spec);
        }
        let fare_zone_boardings = self.transit_spec(tp, AssignmentClass::TransitWork, true,
                                                    false)?;

        return Ok(PeriodSpecs {
            cars,
            cars_lightweight,
            bikes,
            pedestrians,
            transit,
            final_transit,
            fare_zone_boardings,
        });
    }

    fn transit_spec(&self, tp: TimePeriod, class: AssignmentClass, count_zone_boardings: bool,
                    is_last_iteration: bool) -> Result<TransitAssignmentSpec, AssignmentError> {
        let reg = &self.registry;
        let trip_part = |kind| -> Result<Option<_>, AssignmentError> {
            match count_zone_boardings {
                true => Ok(None),
                false => Ok(Some(reg.id(tp, kind, class)?.clone())),
            }
        };
        let results = TransitResultIds {
            total_impedance: trip_part(MatrixKind::Time)?,
            first_wait: trip_part(MatrixKind::FirstWait)?,
            total_wait: trip_part(MatrixKind::TotalWait)?,
            in_vehicle_time: trip_part(MatrixKind::InVehicleTime)?,
            aux_time: trip_part(MatrixKind::AuxTime)?,
            num_boardings: trip_part(MatrixKind::NumBoardings)?,
            board_time: trip_part(MatrixKind::BoardTime)?,
            dist: reg.id(tp, MatrixKind::Dist, class)?.clone(),
            board_cost: match count_zone_boardings {
                true => Some(reg.id(tp, MatrixKind::BoardCost, class)?.clone()),
                false => None,
            },
        };
        return Ok(TransitAssignmentSpec {
            class,
            modes: self.cfg.transit_assignment_modes(),
            demand: reg.id(tp, MatrixKind::Demand, class)?.clone(),
            headway_fraction: self.cfg.headway_fraction,
            waiting_time_perception_factor: self.cfg.waiting_time_perception_factor,
            extra_waiting_time_perception_factor: self.cfg.extra_waiting_time_perception_factor,
            aux_transit_perception_factor: self.cfg.aux_transit_perception_factor,
            count_zone_boardings,
            is_last_iteration,
            results,
            network_results: None,
        });
    }

    fn assign_cars(&mut self, tp: TimePeriod, fine: bool, lightweight: bool)
                   -> Result<(), AssignmentError> {
        let scenario = self.scenario(tp);
        let function_file = self.cfg.function_dir.join(&self.cfg.func_car);
        self.engine.process_functions(&function_file)?;
        let specs = self.specs(tp)?;
        let mut spec = match lightweight {
            true => specs.cars_lightweight.clone(),
            false => specs.cars.clone(),
        };
        if fine {
            spec.stopping_criteria = self.cfg.stopping_criteria_fine.clone();
        }
        log::info!("Car assignment started...");
        self.engine.run_traffic_assignment(&spec, scenario)?;
        log::info!("Car assignment performed for scenario {}", scenario);
        return Ok(());
    }

    fn assign_bikes(&mut self, tp: TimePeriod) -> Result<(), AssignmentError> {
        let scenario = self.cfg.bike_scenario();
        let function_file = self.cfg.function_dir.join(&self.cfg.func_bike);
        self.engine.process_functions(&function_file)?;
        let spec = self.specs(tp)?.bikes.clone();
        log::info!("Bike assignment started...");
        self.engine.run_traffic_assignment(&spec, scenario)?;
        self.copy_to_other_periods(tp, AssignmentClass::Bike)?;
        log::info!("Bike assignment performed for scenario {}", scenario);
        return Ok(());
    }

    fn assign_pedestrians(&mut self, tp: TimePeriod) -> Result<(), AssignmentError> {
        let scenario = self.scenario(tp);
        let spec = self.specs(tp)?.pedestrians.clone();
        log::info!("Pedestrian assignment started...");
        self.engine.run_pedestrian_assignment(&spec, scenario)?;
        self.copy_to_other_periods(tp, AssignmentClass::Walk)?;
        log::info!("Pedestrian assignment performed for scenario {}", scenario);
        return Ok(());
    }

    fn assign_transit(&mut self, tp: TimePeriod) -> Result<(), AssignmentError> {
        let scenario = self.scenario(tp);
        let spec = match self.specs(tp)?.transit.get(&AssignmentClass::TransitWork) {
            Some(spec) => spec.clone(),
            None => return Err(AssignmentError::UnknownMatrix(
                String::from("transit work specification"))),
        };
        log::info!("Transit assignment started...");
        self.engine.run_transit_assignment(&spec, scenario, true)?;
        log::info!("Transit assignment performed for scenario {}", scenario);
        return Ok(());
    }

    fn assign_congested_transit(&mut self, tp: TimePeriod) -> Result<(), AssignmentError> {
        let scenario = self.scenario(tp);
        let specs = self.specs(tp)?.final_transit.clone();
        let class_names: Vec<AssignmentClass> = specs.iter().map(|ss| ss.class).collect();
        log::info!("Congested transit assignment started...");
        self.engine.run_congested_transit_assignment(&specs, &class_names,
                                                     &self.cfg.congestion_function,
                                                     &self.cfg.congested_transit_stopping,
                                                     scenario)?;
        log::info!("Congested transit assignment performed for scenario {}", scenario);
        return Ok(());
    }

    // Bike and walk results are assigned on one scenario only.
    fn copy_to_other_periods(&mut self, tp: TimePeriod, class: AssignmentClass)
                             -> Result<(), AssignmentError> {
        if !self.registry.saves_matrices() {
            return Ok(());
        }
        for kind in &[MatrixKind::Time, MatrixKind::Dist] {
            let matrix = self.engine.read_matrix(self.registry.id(tp, *kind, class)?)?;
            for other in TimePeriod::all().iter().filter(|other| **other != tp) {
                let id = self.registry.id(*other, *kind, class)?;
                self.engine.write_matrix(id, &matrix)?;
            }
        }
        return Ok(());
    }

    fn calc_extra_wait_time(&mut self, scenario: ScenarioId) -> Result<(), AssignmentError> {
        log::info!("Calculates cumulative travel times for scenario {}", scenario);
        let mut network = self.engine.get_network(scenario)?;
        network_attributes::calc_extra_wait_time(&mut network, &self.cfg.headway_sd_func)?;
        self.engine.publish_network(scenario, network)?;
        return Ok(());
    }

    fn calc_background_traffic(&mut self, tp: TimePeriod) -> Result<(), AssignmentError> {
        let scenario = self.scenario(tp);
        let state = self.period_state(tp);
        let mut network = self.engine.get_network(scenario)?;
        network_attributes::calc_background_traffic(&mut network, state.freight_in_background);
        self.engine.publish_network(scenario, network)?;
        return Ok(());
    }

    fn read_raw_impedance(&self, tp: TimePeriod, is_final: bool)
                          -> Result<RawImpedance, AssignmentError> {
        let mut matrices = ImpedanceMatrices::new();
        for imp_type in ImpedanceType::all().iter() {
            let kind = match imp_type {
                ImpedanceType::Time => MatrixKind::Time,
                ImpedanceType::Cost => MatrixKind::Cost,
                ImpedanceType::Dist => MatrixKind::Dist,
            };
            let mut class_mtxs = ClassMatrices::new();
            for class in self.registry.classes(tp, kind) {
                if class.is_freight() && !is_final {
                    continue;
                }
                class_mtxs.insert(class, self.read(tp, kind, class)?);
            }
            matrices.insert(*imp_type, class_mtxs);
        }
        let mut gen_cost = ClassMatrices::new();
        for class in AssignmentClass::car_classes().iter() {
            gen_cost.insert(*class, self.read(tp, MatrixKind::GenCost, *class)?);
        }
        let mut first_wait = ClassMatrices::new();
        for class in AssignmentClass::transit_classes().iter() {
            first_wait.insert(*class, self.read(tp, MatrixKind::FirstWait, *class)?);
        }
        return Ok(RawImpedance {matrices, gen_cost, first_wait});
    }

    fn read(&self, tp: TimePeriod, kind: MatrixKind, class: AssignmentClass)
            -> Result<Array2<f64>, AssignmentError> {
        self.engine.read_matrix(self.registry.id(tp, kind, class)?)
    }
}


/// Checks every demand matrix before any of them is written to the engine.  The first invalid
/// class in class order is reported.
fn validate_demand<F>(demand: &HashMap<AssignmentClass, Array2<f64>>, nr_zones: usize,
                      has_demand_slot: F) -> Result<(), AssignmentError>
    where F: Fn(AssignmentClass) -> bool + Sync
{
    let mut invalid: Vec<(AssignmentClass, String)> = demand.par_iter()
        .filter_map(|(class, matrix)| {
            let reason = if !has_demand_slot(*class) {
                String::from("class has no demand matrix")
            } else if matrix.dim() != (nr_zones, nr_zones) {
                format!("shape {:?} does not match {} zones", matrix.dim(), nr_zones)
            } else if matrix.iter().any(|vv| vv.is_nan()) {
                String::from("NaN values would make the assignment loop forever")
            } else if matrix.iter().any(|vv| !vv.is_finite()) {
                String::from("infinite values")
            } else if matrix.iter().any(|vv| *vv < 0.) {
                String::from("negative values")
            } else {
                return None;
            };
            Some((*class, reason))
        })
        .collect();
    invalid.sort_by_key(|(class, _)| *class);
    if let Some((class, reason)) = invalid.into_iter().next() {
        log::error!("Invalid demand matrix {}: {}", class, reason);
        return Err(AssignmentError::InvalidDemand {
            class: String::from(class.as_str()),
            reason,
        });
    }
    return Ok(());
}


#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn test_stage_parsing() {
        assert_eq!("init".parse::<IterationStage>().unwrap(), IterationStage::Initial);
        assert_eq!("last".parse::<IterationStage>().unwrap(), IterationStage::Final);
        assert_eq!("0".parse::<IterationStage>().unwrap(), IterationStage::Early);
        assert_eq!("1".parse::<IterationStage>().unwrap(), IterationStage::Stabilizing);
        assert_eq!("7".parse::<IterationStage>().unwrap(), IterationStage::Refining(7));
        assert!("-1".parse::<IterationStage>().is_err());
        assert!("first".parse::<IterationStage>().is_err());
        for stage in &[IterationStage::Initial, IterationStage::Refining(3),
                       IterationStage::Final] {
            assert_eq!(stage.to_string().parse::<IterationStage>().unwrap(), *stage);
        }
        assert!(IterationStage::Refining(1).validate().is_err());
    }

    #[test]
    fn test_freight_stays_in_background() {
        let state = PeriodState::default();
        assert!(!state.freight_in_background);
        let state = state.after_stage(IterationStage::Early);
        assert!(!state.freight_in_background);
        let state = state.after_stage(IterationStage::Stabilizing);
        assert!(state.freight_in_background);
        for stage in &[IterationStage::Refining(2), IterationStage::Final,
                       IterationStage::Initial, IterationStage::Early] {
            assert!(state.after_stage(*stage).freight_in_background);
        }
    }

    #[test]
    fn test_demand_validation() {
        let all_slots = |_: AssignmentClass| true;
        let mut demand = HashMap::new();
        demand.insert(AssignmentClass::CarWork, Array2::ones((2, 2)));
        assert!(validate_demand(&demand, 2, all_slots).is_ok());
        assert!(validate_demand(&demand, 3, all_slots).is_err());

        demand.insert(AssignmentClass::Bike, array![[0., f64::NAN], [1., 1.]]);
        match validate_demand(&demand, 2, all_slots) {
            Err(AssignmentError::InvalidDemand {class, ..}) => assert_eq!(class, "bike"),
            _ => panic!("NaN demand was accepted"),
        }
        demand.insert(AssignmentClass::Bike, array![[0., -1.], [1., 1.]]);
        assert!(validate_demand(&demand, 2, all_slots).is_err());
        demand.insert(AssignmentClass::Bike, array![[0., f64::INFINITY], [1., 1.]]);
        assert!(validate_demand(&demand, 2, all_slots).is_err());

        let mut walk = HashMap::new();
        walk.insert(AssignmentClass::Walk, Array2::ones((2, 2)));
        assert!(validate_demand(&walk, 2, |class| class != AssignmentClass::Walk).is_err());
    }

    #[test]
    fn test_link_volume_attributes_match_freight_volumes() {
        assert_eq!(link_volume_attribute(AssignmentClass::Truck),
                   network_attributes::TRUCK_VOLUME);
        assert_eq!(link_volume_attribute(AssignmentClass::TrailerTruck),
                   network_attributes::TRAILER_TRUCK_VOLUME);
        assert_eq!(link_volume_attribute(AssignmentClass::Van), network_attributes::VAN_VOLUME);
    }
}
