use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use yaml_rust::Yaml;
use yaml_rust::YamlLoader;

use super::AssignmentError;
use super::Purpose;
use super::TimePeriod;


/// Convergence limits handed to the engine for one assignment run.
#[derive(PartialEq, Debug, Clone)]
pub struct StoppingCriteria {
    pub max_iterations: u32,
    pub relative_gap: f64,
    pub best_relative_gap: f64,
    pub normalized_gap: f64,
}

impl StoppingCriteria {
    pub fn coarse() -> StoppingCriteria {
        StoppingCriteria {
            max_iterations: 100,
            relative_gap: 0.0001,
            best_relative_gap: 0.01,
            normalized_gap: 0.005,
        }
    }

    pub fn fine() -> StoppingCriteria {
        StoppingCriteria {
            max_iterations: 200,
            relative_gap: 0.00001,
            best_relative_gap: 0.001,
            normalized_gap: 0.0005,
        }
    }

    /// A single all-or-nothing pass, as used for bicycles.
    pub fn single_pass() -> StoppingCriteria {
        StoppingCriteria {
            max_iterations: 1,
            relative_gap: 1.,
            best_relative_gap: 1.,
            normalized_gap: 1.,
        }
    }

    fn congested_transit() -> StoppingCriteria {
        StoppingCriteria {
            max_iterations: 10,
            relative_gap: 0.001,
            best_relative_gap: 0.,
            normalized_gap: 0.01,
        }
    }

    fn from_yaml(yaml_cfg: &Yaml, default: StoppingCriteria)
                 -> Result<StoppingCriteria, AssignmentError> {
        if yaml_cfg.is_badvalue() {
            return Ok(default);
        }
        return Ok(StoppingCriteria {
            max_iterations: opt_u32(yaml_cfg, "max_iterations", default.max_iterations)?,
            relative_gap: opt_f64(yaml_cfg, "relative_gap", default.relative_gap)?,
            best_relative_gap: opt_f64(yaml_cfg, "best_relative_gap",
                                       default.best_relative_gap)?,
            normalized_gap: opt_f64(yaml_cfg, "normalized_gap", default.normalized_gap)?,
        });
    }
}

/// Crowding function of the congested transit assignment.
#[derive(PartialEq, Debug, Clone)]
pub struct CongestionFunction {
    pub weight: f64,
    pub exponent: f64,
    pub assignment_period: f64,
}

impl Default for CongestionFunction {
    fn default() -> CongestionFunction {
        CongestionFunction {weight: 1.23, exponent: 3., assignment_period: 1.}
    }
}

/// Linear model of headway standard deviation along a line.
#[derive(PartialEq, Debug, Clone)]
pub struct HeadwaySdParams {
    pub asc: f64,
    pub ctime: f64,
    pub cspeed: f64,
}

impl HeadwaySdParams {
    pub fn new(asc: f64, ctime: f64, cspeed: f64) -> HeadwaySdParams {
        HeadwaySdParams {asc, ctime, cspeed}
    }
}

/// Inclusive range of zone numbers.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct ZoneRange {
    pub first: u32,
    pub last: u32,
}

impl ZoneRange {
    pub fn new(first: u32, last: u32) -> ZoneRange {
        ZoneRange {first, last}
    }

    pub fn contains(&self, zone_number: u32) -> bool {
        self.first <= zone_number && zone_number <= self.last
    }

    fn from_yaml(yaml_cfg: &Yaml, key: &str) -> Result<ZoneRange, AssignmentError> {
        match yaml_cfg.as_vec() {
            Some(bounds) if bounds.len() == 2 => {
                let first = bounds[0].as_i64();
                let last = bounds[1].as_i64();
                match (first, last) {
                    (Some(ff), Some(ll)) if 0 <= ff && ff <= ll =>
                        Ok(ZoneRange::new(ff as u32, ll as u32)),
                    _ => Err(AssignmentError::Config(
                        format!("{} must be an increasing pair of zone numbers", key))),
                }
            }
            _ => Err(AssignmentError::Config(format!("{} must be a [first, last] pair", key))),
        }
    }
}


#[derive(Clone, Debug)]
pub struct AssignmentConfig {
    // bike scenario id; day, aht, pt and iht scenarios follow it
    pub first_scenario_id: u32,
    pub save_matrices: bool,
    pub first_matrix_id: u32,
    // inverse value of time, min/eur
    pub vot_inv_work: f64,
    pub vot_inv_leisure: f64,
    // eur/km
    pub dist_unit_cost: f64,
    pub waiting_time_perception_factor: f64,
    pub headway_fraction: f64,
    pub extra_waiting_time_perception_factor: f64,
    pub aux_transit_perception_factor: f64,
    pub boarding_penalty: HashMap<char, f64>,
    // penalties of the final iteration, the same as boarding_penalty unless given
    pub last_boarding_penalty: HashMap<char, f64>,
    pub headway_sd_func: HashMap<char, HeadwaySdParams>,
    pub stopping_criteria_coarse: StoppingCriteria,
    pub stopping_criteria_fine: StoppingCriteria,
    pub congestion_function: CongestionFunction,
    pub congested_transit_stopping: StoppingCriteria,
    pub car_mode: char,
    pub bike_mode: char,
    pub van_mode: char,
    pub truck_mode: char,
    pub trailer_truck_mode: char,
    pub transit_modes: Vec<char>,
    pub aux_modes: Vec<char>,
    pub function_dir: PathBuf,
    pub func_car: String,
    pub func_bike: String,
    // boarding penalty added to every line while tracing fare zone visits
    pub fare_zone_extra_penalty: f64,
    pub peripheral_zones: ZoneRange,
    pub municipalities: BTreeMap<String, ZoneRange>,
    // period to day expansion factors, by class name or transit mode group
    pub volume_factors: BTreeMap<String, BTreeMap<TimePeriod, f64>>,
}

impl Default for AssignmentConfig {
    fn default() -> AssignmentConfig {
        let boarding_penalty: HashMap<char, f64> = vec![
            ('b', 3.), ('g', 3.), ('d', 5.), ('e', 5.), ('t', 0.), ('p', 0.), ('m', 0.),
            ('w', 0.), ('r', 2.), ('j', 2.),
        ].into_iter().collect();
        let last_boarding_penalty = boarding_penalty.clone();
        let headway_sd_func: HashMap<char, HeadwaySdParams> = vec![
            ('b', HeadwaySdParams::new(2.164, 0.078, -0.028)),
            ('d', HeadwaySdParams::new(2.164, 0.078, -0.028)),
            ('g', HeadwaySdParams::new(2.127, 0.034, -0.021)),
            ('t', HeadwaySdParams::new(1.442, 0.060, -0.039)),
            ('p', HeadwaySdParams::new(1.442, 0.034, -0.039)),
        ].into_iter().collect();
        let municipalities: BTreeMap<String, ZoneRange> = vec![
            (String::from("Helsinki"), ZoneRange::new(0, 1999)),
            (String::from("Espoo"), ZoneRange::new(2000, 3499)),
            (String::from("Kauniainen"), ZoneRange::new(3500, 3999)),
            (String::from("Vantaa"), ZoneRange::new(4000, 5999)),
        ].into_iter().collect();

        AssignmentConfig {
            first_scenario_id: 19,
            save_matrices: false,
            first_matrix_id: 100,
            vot_inv_work: 6.,
            vot_inv_leisure: 6.,
            dist_unit_cost: 0.12,
            waiting_time_perception_factor: 1.5,
            headway_fraction: 0.5,
            extra_waiting_time_perception_factor: 3.5,
            aux_transit_perception_factor: 1.75,
            boarding_penalty,
            last_boarding_penalty,
            headway_sd_func,
            stopping_criteria_coarse: StoppingCriteria::coarse(),
            stopping_criteria_fine: StoppingCriteria::fine(),
            congestion_function: CongestionFunction::default(),
            congested_transit_stopping: StoppingCriteria::congested_transit(),
            car_mode: 'c',
            bike_mode: 'f',
            van_mode: 'v',
            truck_mode: 'k',
            trailer_truck_mode: 'y',
            transit_modes: vec!['b', 'd', 'e', 'g', 'j', 'm', 'p', 'r', 't', 'w'],
            aux_modes: vec!['a', 's'],
            function_dir: PathBuf::from("."),
            func_car: String::from("d411_pituusriippuvaiset_HM30.in"),
            func_bike: String::from("d411_pituusriippuvaiset_pyora.in"),
            fare_zone_extra_penalty: 5.,
            peripheral_zones: ZoneRange::new(16000, 30999),
            municipalities,
            volume_factors: BTreeMap::new(),
        }
    }
}

impl AssignmentConfig {
    pub fn from_file(config_path: &Path) -> Result<AssignmentConfig, AssignmentError> {
        let file_contents = std::fs::read_to_string(config_path)?;
        let mut cfg = AssignmentConfig::from_str(&file_contents)?;
        // relative function directories are resolved against the config file's directory
        if cfg.function_dir.is_relative() {
            if let Some(dir) = config_path.parent() {
                cfg.function_dir = [dir, cfg.function_dir.as_path()].iter().collect();
            }
        }
        return Ok(cfg);
    }

    pub fn from_str(yaml_str: &str) -> Result<AssignmentConfig, AssignmentError> {
        let yaml_cfgs = YamlLoader::load_from_str(yaml_str)?;
        match yaml_cfgs.first() {
            Some(yaml_cfg) => AssignmentConfig::from_yaml(yaml_cfg),
            // an empty document means all defaults
            None => Ok(AssignmentConfig::default()),
        }
    }

    /// Reads the config from yaml.  Every key is optional and falls back to the default value.
    pub fn from_yaml(yaml_cfg: &Yaml) -> Result<AssignmentConfig, AssignmentError> {
        let default = AssignmentConfig::default();
        let boarding_penalty = mode_table(&yaml_cfg["boarding_penalty"], "boarding_penalty",
                                          default.boarding_penalty)?;
        let mut cfg = AssignmentConfig {
            first_scenario_id: opt_u32(yaml_cfg, "first_scenario_id", default.first_scenario_id)?,
            save_matrices: opt_bool(yaml_cfg, "save_matrices", default.save_matrices)?,
            first_matrix_id: opt_u32(yaml_cfg, "first_matrix_id", default.first_matrix_id)?,
            vot_inv_work: opt_f64(yaml_cfg, "vot_inv_work", default.vot_inv_work)?,
            vot_inv_leisure: opt_f64(yaml_cfg, "vot_inv_leisure", default.vot_inv_leisure)?,
            dist_unit_cost: opt_f64(yaml_cfg, "dist_unit_cost", default.dist_unit_cost)?,
            waiting_time_perception_factor: opt_f64(yaml_cfg, "waiting_time_perception_factor",
                                                    default.waiting_time_perception_factor)?,
            headway_fraction: opt_f64(yaml_cfg, "headway_fraction", default.headway_fraction)?,
            extra_waiting_time_perception_factor: opt_f64(
                yaml_cfg, "extra_waiting_time_perception_factor",
                default.extra_waiting_time_perception_factor)?,
            aux_transit_perception_factor: opt_f64(yaml_cfg, "aux_transit_perception_factor",
                                                   default.aux_transit_perception_factor)?,
            last_boarding_penalty: mode_table(&yaml_cfg["last_boarding_penalty"],
                                              "last_boarding_penalty",
                                              boarding_penalty.clone())?,
            boarding_penalty,
            headway_sd_func: default.headway_sd_func,
            stopping_criteria_coarse: StoppingCriteria::from_yaml(
                &yaml_cfg["stopping_criteria_coarse"], default.stopping_criteria_coarse)?,
            stopping_criteria_fine: StoppingCriteria::from_yaml(
                &yaml_cfg["stopping_criteria_fine"], default.stopping_criteria_fine)?,
            congestion_function: default.congestion_function,
            congested_transit_stopping: StoppingCriteria::from_yaml(
                &yaml_cfg["congested_transit_stopping"], default.congested_transit_stopping)?,
            car_mode: opt_char(yaml_cfg, "car_mode", default.car_mode)?,
            bike_mode: opt_char(yaml_cfg, "bike_mode", default.bike_mode)?,
            van_mode: opt_char(yaml_cfg, "van_mode", default.van_mode)?,
            truck_mode: opt_char(yaml_cfg, "truck_mode", default.truck_mode)?,
            trailer_truck_mode: opt_char(yaml_cfg, "trailer_truck_mode",
                                         default.trailer_truck_mode)?,
            transit_modes: opt_modes(yaml_cfg, "transit_modes", default.transit_modes)?,
            aux_modes: opt_modes(yaml_cfg, "aux_modes", default.aux_modes)?,
            function_dir: match yaml_cfg["function_dir"].as_str() {
                Some(dir) => PathBuf::from(dir),
                None => default.function_dir,
            },
            func_car: opt_string(yaml_cfg, "func_car", default.func_car),
            func_bike: opt_string(yaml_cfg, "func_bike", default.func_bike),
            fare_zone_extra_penalty: opt_f64(yaml_cfg, "fare_zone_extra_penalty",
                                             default.fare_zone_extra_penalty)?,
            peripheral_zones: match yaml_cfg["peripheral_zones"].is_badvalue() {
                true => default.peripheral_zones,
                false => ZoneRange::from_yaml(&yaml_cfg["peripheral_zones"], "peripheral_zones")?,
            },
            municipalities: default.municipalities,
            volume_factors: default.volume_factors,
        };

        if let Some(funcs) = yaml_cfg["headway_sd_func"].as_hash() {
            let mut table = HashMap::new();
            for (mode, params) in funcs {
                let mode = yaml_mode_key(mode, "headway_sd_func")?;
                table.insert(mode, HeadwaySdParams::new(
                    req_f64(params, "asc")?, req_f64(params, "ctime")?, req_f64(params, "cspeed")?
                ));
            }
            cfg.headway_sd_func = table;
        }

        let cf = &yaml_cfg["congestion_function"];
        if !cf.is_badvalue() {
            cfg.congestion_function = CongestionFunction {
                weight: opt_f64(cf, "weight", cfg.congestion_function.weight)?,
                exponent: opt_f64(cf, "exponent", cfg.congestion_function.exponent)?,
                assignment_period: opt_f64(cf, "assignment_period",
                                           cfg.congestion_function.assignment_period)?,
            };
        }

        if let Some(munis) = yaml_cfg["municipalities"].as_hash() {
            let mut table = BTreeMap::new();
            for (name, bounds) in munis {
                let name = match name.as_str() {
                    Some(name) => String::from(name),
                    None => return Err(AssignmentError::Config(
                        String::from("municipality names must be strings"))),
                };
                let range = ZoneRange::from_yaml(bounds, &name)?;
                table.insert(name, range);
            }
            cfg.municipalities = table;
        }

        if let Some(factors) = yaml_cfg["volume_factors"].as_hash() {
            for (name, periods) in factors {
                let name = match name.as_str() {
                    Some(name) => String::from(name),
                    None => return Err(AssignmentError::Config(
                        String::from("volume factor names must be strings"))),
                };
                let mut by_period = BTreeMap::new();
                for tp in TimePeriod::all() {
                    by_period.insert(tp, req_f64(periods, tp.as_str())?);
                }
                cfg.volume_factors.insert(name, by_period);
            }
        }

        cfg.validate()?;
        return Ok(cfg);
    }

    pub fn validate(&self) -> Result<(), AssignmentError> {
        if self.vot_inv_work <= 0. || self.vot_inv_leisure <= 0. {
            return Err(AssignmentError::Config(
                String::from("inverse values of time must be positive")));
        }
        if self.dist_unit_cost < 0. {
            return Err(AssignmentError::Config(
                String::from("dist_unit_cost must not be negative")));
        }
        if self.waiting_time_perception_factor < 0. {
            return Err(AssignmentError::Config(
                String::from("waiting_time_perception_factor must not be negative")));
        }
        if self.save_matrices && self.first_matrix_id < 100 {
            // ids below 100 are reserved for the shared matrices
            return Err(AssignmentError::Config(
                String::from("first_matrix_id must be at least 100 when saving matrices")));
        }
        return Ok(());
    }

    pub fn vot_inv(&self, purpose: Purpose) -> f64 {
        match purpose {
            Purpose::Work => self.vot_inv_work,
            Purpose::Leisure => self.vot_inv_leisure,
        }
    }

    /// The factor that expands a period's volume of `name` to a day's volume.
    pub fn volume_factor(&self, name: &str, tp: TimePeriod) -> Result<f64, AssignmentError> {
        match self.volume_factors.get(name).and_then(|factors| factors.get(&tp)) {
            Some(factor) => Ok(*factor),
            None => Err(AssignmentError::Config(
                format!("no volume factor for {} in period {}", name, tp))),
        }
    }

    pub fn bike_scenario(&self) -> u32 {
        self.first_scenario_id
    }

    pub fn day_scenario(&self) -> u32 {
        self.first_scenario_id + 1
    }

    pub fn transit_assignment_modes(&self) -> Vec<char> {
        let mut modes = self.transit_modes.clone();
        modes.extend(self.aux_modes.iter());
        return modes;
    }
}


fn type_error(key: &str, expected: &str) -> AssignmentError {
    AssignmentError::Config(format!("{} must be {}", key, expected))
}

fn opt_f64(yaml_cfg: &Yaml, key: &str, default: f64) -> Result<f64, AssignmentError> {
    let value = &yaml_cfg[key];
    if value.is_badvalue() {
        return Ok(default);
    }
    // integers are accepted where floats are expected
    match value {
        Yaml::Real(_) => value.as_f64().ok_or_else(|| type_error(key, "a number")),
        Yaml::Integer(ii) => Ok(*ii as f64),
        _ => Err(type_error(key, "a number")),
    }
}

fn req_f64(yaml_cfg: &Yaml, key: &str) -> Result<f64, AssignmentError> {
    if yaml_cfg[key].is_badvalue() {
        return Err(AssignmentError::Config(format!("missing {}", key)));
    }
    return opt_f64(yaml_cfg, key, 0.);
}

fn opt_u32(yaml_cfg: &Yaml, key: &str, default: u32) -> Result<u32, AssignmentError> {
    let value = &yaml_cfg[key];
    if value.is_badvalue() {
        return Ok(default);
    }
    match value.as_i64() {
        Some(ii) if ii >= 0 => Ok(ii as u32),
        _ => Err(type_error(key, "a non-negative integer")),
    }
}

fn opt_bool(yaml_cfg: &Yaml, key: &str, default: bool) -> Result<bool, AssignmentError> {
    let value = &yaml_cfg[key];
    if value.is_badvalue() {
        return Ok(default);
    }
    value.as_bool().ok_or_else(|| type_error(key, "true or false"))
}

fn opt_string(yaml_cfg: &Yaml, key: &str, default: String) -> String {
    match yaml_cfg[key].as_str() {
        Some(ss) => String::from(ss),
        None => default,
    }
}

fn single_char(ss: &str) -> Option<char> {
    let mut chars = ss.chars();
    match (chars.next(), chars.next()) {
        (Some(cc), None) => Some(cc),
        _ => None,
    }
}

fn opt_char(yaml_cfg: &Yaml, key: &str, default: char) -> Result<char, AssignmentError> {
    let value = &yaml_cfg[key];
    if value.is_badvalue() {
        return Ok(default);
    }
    value.as_str().and_then(single_char).ok_or_else(|| type_error(key, "a single-letter mode"))
}

fn opt_modes(yaml_cfg: &Yaml, key: &str, default: Vec<char>) -> Result<Vec<char>, AssignmentError> {
    let value = &yaml_cfg[key];
    if value.is_badvalue() {
        return Ok(default);
    }
    // modes are given as one string, e.g. "bdegjmprtw"
    match value.as_str() {
        Some(ss) => Ok(ss.chars().collect()),
        None => Err(type_error(key, "a string of mode letters")),
    }
}

fn yaml_mode_key(key: &Yaml, table: &str) -> Result<char, AssignmentError> {
    key.as_str().and_then(single_char)
        .ok_or_else(|| type_error(table, "keyed by single-letter modes"))
}

/// A table of per-mode values.  A key with several letters sets the value for each of them.
fn mode_table(yaml_cfg: &Yaml, key: &str, default: HashMap<char, f64>)
              -> Result<HashMap<char, f64>, AssignmentError> {
    if yaml_cfg.is_badvalue() {
        return Ok(default);
    }
    let entries = yaml_cfg.as_hash().ok_or_else(|| type_error(key, "a table of modes"))?;
    let mut table = HashMap::new();
    for (modes, value) in entries {
        let modes = modes.as_str().ok_or_else(|| type_error(key, "keyed by mode letters"))?;
        let value = match value {
            Yaml::Integer(ii) => *ii as f64,
            Yaml::Real(_) => value.as_f64().ok_or_else(|| type_error(key, "numeric"))?,
            _ => return Err(type_error(key, "numeric")),
        };
        for mode in modes.chars() {
            table.insert(mode, value);
        }
    }
    return Ok(table);
}
