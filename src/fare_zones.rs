// Transit fares inferred from the fare zones that each OD pair's assigned paths pass through.
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::Path;

use fixedbitset::FixedBitSet;
use itertools::Itertools;
use ndarray::prelude::*;
use ndarray::Zip;

use super::AssignmentError;
use super::ZoneRange;

/// Cost of OD pairs that no zone combination matched.
pub static UNPRICED: f64 = 999.;

static DIST_FARE_KEY: &str = "dist";
static START_FARE_KEY: &str = "start";


/// Prices of fare zone combinations.  A combination is a string of single-character zone labels.
#[derive(PartialEq, Debug, Clone)]
pub struct FareTable {
    fares: BTreeMap<String, f64>,
    // combination -> municipality whose residents alone may use it
    exclusive: BTreeMap<String, String>,
    dist_fare: f64,
    start_fare: f64,
}

impl FareTable {
    pub fn new(start_fare: f64, dist_fare: f64) -> FareTable {
        FareTable {
            fares: BTreeMap::new(),
            exclusive: BTreeMap::new(),
            dist_fare,
            start_fare,
        }
    }

    pub fn add_fare(&mut self, combination: &str, fare: f64) -> Result<(), AssignmentError> {
        check_fare(combination, fare)?;
        if combination.is_empty() {
            return Err(AssignmentError::InvalidFareTable(
                String::from("empty zone combination")));
        }
        self.fares.insert(String::from(combination), fare);
        return Ok(());
    }

    pub fn set_exclusive(&mut self, combination: &str, municipality: &str)
                         -> Result<(), AssignmentError> {
        if !self.fares.contains_key(combination) {
            return Err(AssignmentError::InvalidFareTable(
                format!("exclusive combination {} has no fare", combination)));
        }
        self.exclusive.insert(String::from(combination), String::from(municipality));
        return Ok(());
    }

    /// Reads a tab-separated fare table.  The header names the columns zone_combination, fare
    /// and, optionally, exclusive; lines starting with # are skipped.  The rows dist and start
    /// hold the distance fare (eur/km) and the start fare.
    pub fn from_csv(csv_path: &Path) -> Result<FareTable, AssignmentError> {
        let file = File::open(csv_path)?;
        return FareTable::from_reader(file);
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<FareTable, AssignmentError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|hh| hh == name);
        let (comb_col, fare_col) = match (column("zone_combination"), column("fare")) {
            (Some(cc), Some(ff)) => (cc, ff),
            _ => return Err(AssignmentError::InvalidFareTable(
                String::from("header must name zone_combination and fare columns"))),
        };
        let excl_col = column("exclusive");

        let mut fares = vec![];
        let mut exclusive = vec![];
        let mut dist_fare = None;
        let mut start_fare = None;
        for result in reader.records() {
            let record = result?;
            let combination = match record.get(comb_col) {
                Some(cc) if !cc.is_empty() => cc,
                _ => continue,
            };
            let fare_str = record.get(fare_col).unwrap_or("");
            let fare: f64 = match fare_str.parse() {
                Ok(fare) => fare,
                Err(_) => return Err(AssignmentError::InvalidFareTable(
                    format!("fare '{}' of {} is not a number", fare_str, combination))),
            };
            check_fare(combination, fare)?;
            if combination == DIST_FARE_KEY {
                dist_fare = Some(fare);
            } else if combination == START_FARE_KEY {
                start_fare = Some(fare);
            } else {
                fares.push((String::from(combination), fare));
                let municipality = excl_col.and_then(|col| record.get(col)).unwrap_or("");
                if !municipality.is_empty() {
                    exclusive.push((String::from(combination), String::from(municipality)));
                }
            }
        }

        let (start_fare, dist_fare) = match (start_fare, dist_fare) {
            (Some(ss), Some(dd)) => (ss, dd),
            _ => return Err(AssignmentError::InvalidFareTable(
                format!("rows {} and {} are required", START_FARE_KEY, DIST_FARE_KEY))),
        };
        let mut table = FareTable::new(start_fare, dist_fare);
        for (combination, fare) in fares {
            table.add_fare(&combination, fare)?;
        }
        for (combination, municipality) in exclusive {
            table.set_exclusive(&combination, &municipality)?;
        }
        log::debug!("Read {} fare zone combinations, {} of them exclusive", table.fares.len(),
                    table.exclusive.len());
        return Ok(table);
    }

    pub fn fares(&self) -> &BTreeMap<String, f64> {
        &self.fares
    }

    pub fn exclusive(&self) -> &BTreeMap<String, String> {
        &self.exclusive
    }

    pub fn dist_fare(&self) -> f64 {
        self.dist_fare
    }

    pub fn start_fare(&self) -> f64 {
        self.start_fare
    }

    /// Every zone label used by some priced combination.
    pub fn zone_labels(&self) -> BTreeSet<String> {
        self.fares.keys().flat_map(|comb| comb.chars()).map(|cc| cc.to_string()).collect()
    }

    /// Fails if an exclusive combination names a municipality that has no zone range.
    pub fn check_municipalities(&self, municipalities: &BTreeMap<String, ZoneRange>)
                                -> Result<(), AssignmentError> {
        for (combination, municipality) in &self.exclusive {
            if !municipalities.contains_key(municipality) {
                return Err(AssignmentError::InvalidFareTable(
                    format!("combination {} is exclusive to unknown municipality {}",
                            combination, municipality)));
            }
        }
        return Ok(());
    }

    /// The distance-based fare of a trip.
    pub fn distance_fare(&self, dist_km: f64) -> f64 {
        self.start_fare + self.dist_fare * dist_km
    }
}

fn check_fare(combination: &str, fare: f64) -> Result<(), AssignmentError> {
    if !fare.is_finite() || fare < 0. {
        return Err(AssignmentError::InvalidFareTable(
            format!("fare {} of {} must be finite and non-negative", fare, combination)));
    }
    return Ok(());
}


/// Warns about fare zones that exist on only one side.  Returns true if both sides agree.
pub fn check_zone_labels(network_labels: &BTreeSet<String>, table: &FareTable) -> bool {
    let table_labels = table.zone_labels();
    log::debug!("Network has fare zones {}", network_labels.iter().join(", "));
    log::debug!("Fare table has fare zones {}", table_labels.iter().join(", "));
    let unknown_to_network: Vec<&String> = table_labels.difference(network_labels).collect();
    let unpriced: Vec<&String> = network_labels.difference(&table_labels).collect();
    if unknown_to_network.len() > 0 {
        log::warn!("Fare zones {} of the fare table do not exist in network labels",
                   unknown_to_network.iter().join(", "));
    }
    if unpriced.len() > 0 {
        log::warn!("Network labels {} have no fare specified", unpriced.iter().join(", "));
    }
    return unknown_to_network.is_empty() && unpriced.is_empty();
}


/// The fare zones each OD pair's paths visited.  Every zone label has a bit set over the OD
/// pairs, pair (i, j) at bit i * nr_zones + j.
#[derive(PartialEq, Debug, Clone)]
pub struct ZoneVisits {
    nr_zones: usize,
    labels: Vec<String>,
    visited: Vec<FixedBitSet>,
}

impl ZoneVisits {
    pub fn new(nr_zones: usize) -> ZoneVisits {
        ZoneVisits {nr_zones, labels: vec![], visited: vec![]}
    }

    /// Folds a lazy sequence of per-zone visit matrices into one.  Each matrix is dropped as
    /// soon as it is folded in.
    pub fn collect<I>(nr_zones: usize, zone_visits: I) -> Result<ZoneVisits, AssignmentError>
        where I: IntoIterator<Item = Result<(String, Array2<bool>), AssignmentError>>
    {
        let mut visits = ZoneVisits::new(nr_zones);
        for zone_visit in zone_visits {
            let (label, visited) = zone_visit?;
            visits.add_zone(&label, &visited)?;
        }
        return Ok(visits);
    }

    fn label_index(&mut self, label: &str) -> usize {
        if let Some(index) = self.labels.iter().position(|ll| ll == label) {
            return index;
        }
        self.labels.push(String::from(label));
        self.visited.push(FixedBitSet::with_capacity(self.nr_zones * self.nr_zones));
        return self.labels.len() - 1;
    }

    pub fn add_zone(&mut self, label: &str, visited: &Array2<bool>)
                    -> Result<(), AssignmentError> {
        let dim = (self.nr_zones, self.nr_zones);
        if visited.dim() != dim {
            return Err(AssignmentError::InvalidInput(
                format!("visits of zone {} are {:?}, expected {:?}", label, visited.dim(),
                        dim)));
        }
        let nr_zones = self.nr_zones;
        let index = self.label_index(label);
        let pairs = &mut self.visited[index];
        for ((ii, jj), &vv) in visited.indexed_iter() {
            if vv {
                pairs.insert(ii * nr_zones + jj);
            }
        }
        return Ok(());
    }

    /// Every trip ends in the fare zone of its destination, boarding there or not.
    pub fn mark_destination_zones(&mut self, destination_labels: &[String])
                                  -> Result<(), AssignmentError> {
        if destination_labels.len() != self.nr_zones {
            return Err(AssignmentError::InvalidInput(
                format!("{} destination labels for {} zones", destination_labels.len(),
                        self.nr_zones)));
        }
        let nr_zones = self.nr_zones;
        for (jj, label) in destination_labels.iter().enumerate() {
            let index = self.label_index(label);
            let pairs = &mut self.visited[index];
            for ii in 0..nr_zones {
                pairs.insert(ii * nr_zones + jj);
            }
        }
        return Ok(());
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn nr_zones(&self) -> usize {
        self.nr_zones
    }

    pub fn has_visited(&self, label: &str) -> Option<Array2<bool>> {
        let index = self.labels.iter().position(|ll| ll == label)?;
        let pairs = &self.visited[index];
        let nr_zones = self.nr_zones;
        return Some(Array2::from_shape_fn((nr_zones, nr_zones),
                                          |(ii, jj)| pairs.contains(ii * nr_zones + jj)));
    }

    // OD pairs that visited some label not part of the combination
    fn outside(&self, combination: &str) -> FixedBitSet {
        let mut outside = FixedBitSet::with_capacity(self.nr_zones * self.nr_zones);
        for (label, pairs) in self.labels.iter().zip(&self.visited) {
            if !combination.contains(label.as_str()) {
                outside.union_with(pairs);
            }
        }
        return outside;
    }
}


/// Prices every OD pair from its visited fare zones.  Each pair pays the cheapest combination
/// that covers all the zones it visited; combinations exclusive to a municipality only apply
/// to origins inside it.  Pairs left unpriced pay the distance fare of the transit distance.
pub fn resolve_fares(visits: &ZoneVisits, table: &FareTable, zone_numbers: &[u32],
                     municipalities: &BTreeMap<String, ZoneRange>, dist: &Array2<f64>)
                     -> Result<Array2<f64>, AssignmentError> {
    let nr_zones = visits.nr_zones();
    let dim = (nr_zones, nr_zones);
    if zone_numbers.len() != dim.0 || dist.dim() != dim {
        return Err(AssignmentError::InvalidInput(
            format!("{} zone numbers and a {:?} distance matrix for {:?} zone visits",
                    zone_numbers.len(), dist.dim(), dim)));
    }
    table.check_municipalities(municipalities)?;

    let mut cost = Array2::from_elem(dim, UNPRICED);
    for (combination, fare) in table.fares() {
        let outside = visits.outside(combination);
        let origin_range = table.exclusive().get(combination)
                                .and_then(|municipality| municipalities.get(municipality));
        Zip::indexed(&mut cost).for_each(|(ii, jj), cc| {
            let is_inside = !outside.contains(ii * nr_zones + jj) && match origin_range {
                Some(range) => range.contains(zone_numbers[ii]),
                None => true,
            };
            if is_inside && *fare < *cc {
                *cc = *fare;
            }
        });
    }

    Zip::from(&mut cost).and(dist).for_each(|cc, &dd| {
        if *cc >= UNPRICED {
            *cc = table.distance_fare(dd);
        }
    });
    return Ok(cost);
}

/// Overwrites the fares of trips to and from peripheral zones with a fixed matrix.  The fixed
/// matrix has a row for every peripheral zone and a column for every zone up to the last
/// peripheral one.  Zone numbers must be in increasing order.
pub fn apply_peripheral_cost(cost: &mut Array2<f64>, zone_numbers: &[u32],
                             peripheral_zones: &ZoneRange, peripheral_cost: &Array2<f64>)
                             -> Result<(), AssignmentError> {
    if let Some(pos) = zone_numbers.windows(2).position(|ww| ww[0] >= ww[1]) {
        return Err(AssignmentError::InvalidInput(
            format!("zone numbers are not increasing: {} is followed by {}", zone_numbers[pos],
                    zone_numbers[pos + 1])));
    }
    let lower = zone_numbers.iter().take_while(|zz| **zz < peripheral_zones.first).count();
    let upper = zone_numbers.iter().take_while(|zz| **zz <= peripheral_zones.last).count();
    if lower >= upper {
        log::debug!("No peripheral zones within {}-{}", peripheral_zones.first,
                    peripheral_zones.last);
        return Ok(());
    }
    if peripheral_cost.dim() != (upper - lower, upper) {
        return Err(AssignmentError::InvalidInput(
            format!("peripheral cost matrix is {:?}, expected {:?}", peripheral_cost.dim(),
                    (upper - lower, upper))));
    }
    cost.slice_mut(s![lower..upper, ..upper]).assign(peripheral_cost);
    cost.slice_mut(s![..upper, lower..upper]).assign(&peripheral_cost.t());
    return Ok(());
}


#[cfg(test)]
mod tests {
    use approx::assert_ulps_eq;
    use ndarray::array;

    use super::*;

    fn abc_table() -> FareTable {
        let mut table = FareTable::new(1.5, 0.1);
        table.add_fare("A", 1.0).unwrap();
        table.add_fare("AB", 2.0).unwrap();
        table.add_fare("ABC", 3.0).unwrap();
        table
    }

    fn single_pair(visited: &[&str], labels: &[&str]) -> ZoneVisits {
        let mut visits = ZoneVisits::new(1);
        for label in labels {
            let is_visited = visited.contains(label);
            visits.add_zone(label, &Array2::from_elem((1, 1), is_visited)).unwrap();
        }
        visits
    }

    fn resolve_single(visits: &ZoneVisits, table: &FareTable, dist: f64) -> f64 {
        let cost = resolve_fares(visits, table, &[1], &BTreeMap::new(),
                                 &Array2::from_elem((1, 1), dist)).unwrap();
        cost[[0, 0]]
    }

    #[test]
    fn test_zone_combinations() {
        let table = abc_table();
        let labels = ["A", "B", "C", "D"];
        assert_ulps_eq!(resolve_single(&single_pair(&["A"], &labels), &table, 10.), 1.0);
        assert_ulps_eq!(resolve_single(&single_pair(&["A", "B"], &labels), &table, 10.), 2.0);
        assert_ulps_eq!(resolve_single(&single_pair(&["A", "B", "C"], &labels), &table, 10.),
                        3.0);
        // D has no fare, so the distance fare applies
        assert_ulps_eq!(resolve_single(&single_pair(&["D"], &labels), &table, 10.), 2.5);
        assert_ulps_eq!(resolve_single(&single_pair(&["A", "D"], &labels), &table, 20.), 3.5);
    }

    #[test]
    fn test_cheapest_matching_combination_wins() {
        let mut table = FareTable::new(0., 0.);
        table.add_fare("AB", 3.0).unwrap();
        table.add_fare("BC", 2.5).unwrap();
        table.add_fare("ABCD", 2.8).unwrap();
        let visits = single_pair(&["B"], &["A", "B", "C", "D"]);
        assert_ulps_eq!(resolve_single(&visits, &table, 1.), 2.5);
    }

    #[test]
    fn test_exclusive_fares_apply_to_resident_origins() {
        let mut table = FareTable::new(5., 0.);
        table.add_fare("A", 2.0).unwrap();
        table.add_fare("AB", 3.0).unwrap();
        table.set_exclusive("A", "Town").unwrap();
        let mut municipalities = BTreeMap::new();
        municipalities.insert(String::from("Town"), ZoneRange::new(0, 99));

        let mut visits = ZoneVisits::new(2);
        visits.add_zone("A", &Array2::from_elem((2, 2), true)).unwrap();
        let cost = resolve_fares(&visits, &table, &[5, 150], &municipalities,
                                 &Array2::zeros((2, 2))).unwrap();
        assert_eq!(cost, array![[2.0, 2.0], [3.0, 3.0]]);

        let unknown = BTreeMap::new();
        assert!(resolve_fares(&visits, &table, &[5, 150], &unknown,
                              &Array2::zeros((2, 2))).is_err());
    }

    #[test]
    fn test_destination_zone_is_visited() {
        let mut visits = ZoneVisits::new(2);
        visits.add_zone("A", &Array2::from_elem((2, 2), false)).unwrap();
        visits.add_zone("B", &Array2::from_elem((2, 2), false)).unwrap();
        visits.mark_destination_zones(&[String::from("A"), String::from("B")]).unwrap();
        let cost = resolve_fares(&visits, &abc_table(), &[1, 2], &BTreeMap::new(),
                                 &Array2::zeros((2, 2))).unwrap();
        assert_eq!(cost, array![[1.0, 2.0], [1.0, 2.0]]);
        assert_eq!(visits.has_visited("B").unwrap(), array![[false, true], [false, true]]);
        assert!(visits.has_visited("C").is_none());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let mut visits = ZoneVisits::new(3);
        visits.add_zone("A", &Array2::from_elem((3, 3), true)).unwrap();
        visits.add_zone("B", &Array2::from_shape_fn((3, 3), |(ii, jj)| ii < jj)).unwrap();
        visits.add_zone("C", &Array2::from_shape_fn((3, 3), |(ii, _)| ii == 2)).unwrap();
        let dist = Array2::from_shape_fn((3, 3), |(ii, jj)| (ii + jj) as f64);
        let first = resolve_fares(&visits, &abc_table(), &[1, 2, 3], &BTreeMap::new(), &dist);
        let second = resolve_fares(&visits, &abc_table(), &[1, 2, 3], &BTreeMap::new(), &dist);
        assert_eq!(first.unwrap(), second.unwrap());
    }

    #[test]
    fn test_many_zones() {
        let label = |ii: u32| std::char::from_u32(0x100 + ii).unwrap().to_string();
        let mut visits = ZoneVisits::new(2);
        let diagonal = Array2::from_shape_fn((2, 2), |(ii, jj)| ii == jj);
        for ii in 0..100 {
            visits.add_zone(&label(ii), &diagonal).unwrap();
        }
        visits.add_zone(&label(99), &Array2::from_elem((2, 2), false)).unwrap();
        assert_eq!(visits.labels().len(), 100);
        assert_eq!(visits.has_visited(&label(99)).unwrap(), diagonal);

        let mut table = FareTable::new(1., 0.);
        table.add_fare(&format!("{}{}", label(1), label(99)), 4.0).unwrap();
        let cost = resolve_fares(&visits, &table, &[1, 2], &BTreeMap::new(),
                                 &Array2::zeros((2, 2))).unwrap();
        // the diagonal visits all 100 zones, other pairs visit none
        assert_eq!(cost, array![[1., 4.], [4., 1.]]);
    }

    #[test]
    fn test_collect_stops_at_first_error() {
        let zone_visits = vec![
            Ok((String::from("A"), Array2::from_elem((2, 2), true))),
            Err(AssignmentError::UnknownScenario(3)),
            Ok((String::from("B"), Array2::from_elem((2, 2), true))),
        ];
        assert!(ZoneVisits::collect(2, zone_visits).is_err());
        let zone_visits = vec![Ok((String::from("A"), Array2::from_elem((3, 3), true)))];
        assert!(ZoneVisits::collect(2, zone_visits).is_err());
    }

    #[test]
    fn test_peripheral_override() {
        let zone_numbers = [100, 200, 16000, 16001, 31000];
        let mut cost = Array2::from_elem((5, 5), 1.);
        let peripheral = array![[7., 7., 7., 7.], [8., 8., 8., 8.]];
        apply_peripheral_cost(&mut cost, &zone_numbers, &ZoneRange::new(16000, 30999),
                              &peripheral).unwrap();
        assert_eq!(cost, array![[1., 1., 7., 8., 1.],
                                [1., 1., 7., 8., 1.],
                                [7., 7., 7., 8., 1.],
                                [8., 8., 7., 8., 1.],
                                [1., 1., 1., 1., 1.]]);
        let wrong_shape = Array2::zeros((2, 5));
        assert!(apply_peripheral_cost(&mut cost, &zone_numbers, &ZoneRange::new(16000, 30999),
                                      &wrong_shape).is_err());
    }

    #[test]
    fn test_peripheral_override_needs_sorted_zones() {
        let mut cost = Array2::from_elem((3, 3), 1.);
        let peripheral = Array2::from_elem((1, 3), 7.);
        let result = apply_peripheral_cost(&mut cost, &[16000, 100, 200],
                                           &ZoneRange::new(16000, 30999), &peripheral);
        assert!(result.is_err());
        assert_eq!(cost, Array2::from_elem((3, 3), 1.));
    }

    #[test]
    fn test_no_peripheral_zones() {
        let mut cost = Array2::from_elem((2, 2), 1.);
        apply_peripheral_cost(&mut cost, &[1, 2], &ZoneRange::new(16000, 30999),
                              &Array2::zeros((0, 0))).unwrap();
        assert_eq!(cost, Array2::from_elem((2, 2), 1.));
    }

    #[test]
    fn test_read_fare_table() {
        let contents = "# fares of the test region\n\
                        zone_combination\tfare\texclusive\n\
                        A\t2.8\tTown\n\
                        AB\t3.2\n\
                        dist\t0.05\n\
                        start\t1.8\n";
        let table = FareTable::from_reader(contents.as_bytes()).unwrap();
        assert_eq!(table.fares().len(), 2);
        assert_ulps_eq!(table.fares()["AB"], 3.2);
        assert_eq!(table.exclusive()["A"], "Town");
        assert_ulps_eq!(table.dist_fare(), 0.05);
        assert_ulps_eq!(table.start_fare(), 1.8);
        assert_ulps_eq!(table.distance_fare(10.), 2.3);
        let labels: Vec<String> = table.zone_labels().into_iter().collect();
        assert_eq!(labels, vec![String::from("A"), String::from("B")]);
    }

    #[test]
    fn test_invalid_fare_tables() {
        let no_start = "zone_combination\tfare\nA\t1\ndist\t0.1\n";
        assert!(FareTable::from_reader(no_start.as_bytes()).is_err());
        let not_a_number = "zone_combination\tfare\nA\tfree\ndist\t0.1\nstart\t1\n";
        assert!(FareTable::from_reader(not_a_number.as_bytes()).is_err());
        let negative = "zone_combination\tfare\nA\t-1\ndist\t0.1\nstart\t1\n";
        assert!(FareTable::from_reader(negative.as_bytes()).is_err());
        let nan = "zone_combination\tfare\nA\tNaN\ndist\t0.1\nstart\t1\n";
        assert!(FareTable::from_reader(nan.as_bytes()).is_err());
        let bad_header = "zones\tprice\nA\t1\n";
        assert!(FareTable::from_reader(bad_header.as_bytes()).is_err());
        let mut table = abc_table();
        assert!(table.set_exclusive("BC", "Town").is_err());
    }

    #[test]
    fn test_label_check() {
        let table = abc_table();
        let same: BTreeSet<String> = ["A", "B", "C"].iter().map(|ss| ss.to_string()).collect();
        assert!(check_zone_labels(&same, &table));
        let extra: BTreeSet<String> = ["A", "B", "C", "D"].iter().map(|ss| ss.to_string())
                                                           .collect();
        assert!(!check_zone_labels(&extra, &table));
    }
}
