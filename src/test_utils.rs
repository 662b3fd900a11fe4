use ndarray::prelude::*;

use super::{Link, Network, Node};


/// Checks that two matrices have the same shape and elementwise values within epsilon.
pub fn assert_matrices_close(query: &Array2<f64>, truth: &Array2<f64>, epsilon: f64) {
    assert_eq!(query.dim(), truth.dim());
    for ((idx, qq), tt) in query.indexed_iter().zip(truth.iter()) {
        assert!((qq - tt).abs() <= epsilon, "Matrices differ at {:?}: {} vs {}", idx, qq, tt);
    }
}

/// Centroids 1 and 3 joined through node 2.  Link 1-2 carries mixed traffic, link 2-3 has a
/// bus lane.  Both links hold tram speeds 15, 18 and 20 km/h.
pub fn corridor_network() -> Network {
    let mut network = Network::new();
    for nn in 1..4 {
        network.add_node(Node::new(nn, "A", nn != 2));
    }
    let mut link = Link::new(2., 1);
    link.toll_rate = 0.5;
    link.auto_time = 3.;
    link.tram_speed_code = 151820.;
    network.add_link(1, 2, link).unwrap();
    let mut link = Link::new(1., 6);
    link.tram_speed_code = 151820.;
    network.add_link(2, 3, link).unwrap();
    return network;
}
