//! Python module `_core`

use crate::config::{ArdParameters, ArdType};
use crate::core::border_noise::remove_border_noise;
use crate::core::grd_to_ard::CreateArdOptions;
use crate::core::raster::convert_to_db;
use crate::io::scene::Sentinel1Scene;
use crate::types::{ProductType, SarError};
use numpy::{PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::path::PathBuf;
use std::str::FromStr;

fn to_py_err(e: SarError) -> PyErr {
    match e {
        SarError::Config(_) | SarError::InvalidFormat(_) => PyValueError::new_err(e.to_string()),
        _ => PyRuntimeError::new_err(e.to_string()),
    }
}

/// Scene metadata parsed from its identifier
#[pyfunction]
fn scene_info(py: Python, scene_id: String) -> PyResult<PyObject> {
    let scene = Sentinel1Scene::parse(&scene_id).map_err(to_py_err)?;
    let info = scene.info();

    let result = PyDict::new(py);
    result.set_item("scene_identifier", info.scene_identifier)?;
    result.set_item("satellite", info.satellite)?;
    result.set_item("acquisition_mode", info.acquisition_mode)?;
    result.set_item("product_type", info.product_type)?;
    result.set_item("acquisition_date", info.acquisition_date)?;
    result.set_item("absolute_orbit", info.absolute_orbit)?;
    result.set_item("relative_orbit", info.relative_orbit)?;
    result.set_item("file_id", scene.file_id())?;
    Ok(result.into())
}

/// ARD parameter template as JSON
#[pyfunction]
fn ard_template(product_type: String, ard_type: String) -> PyResult<String> {
    let product_type = ProductType::from_str(&product_type).map_err(to_py_err)?;
    let ard_type = ArdType::from_str(&ard_type).map_err(to_py_err)?;
    ArdParameters::template(product_type, ard_type)
        .and_then(|p| p.to_json())
        .map_err(to_py_err)
}

/// Process one GRD product; returns the written product paths
#[pyfunction]
#[pyo3(signature = (infile, out_dir, ard_json, subset=None, overwrite=false))]
fn create_ard(
    py: Python,
    infile: String,
    out_dir: String,
    ard_json: String,
    subset: Option<String>,
    overwrite: bool,
) -> PyResult<PyObject> {
    let infile = PathBuf::from(infile);
    let scene = Sentinel1Scene::from_path(&infile).map_err(to_py_err)?;
    let params = ArdParameters::from_json(&ard_json).map_err(to_py_err)?;
    let options = CreateArdOptions {
        subset,
        overwrite,
        gpt: None,
    };

    let outputs = py
        .allow_threads(|| scene.create_ard(&infile, &out_dir, params, &options))
        .map_err(to_py_err)?;

    let result = PyDict::new(py);
    result.set_item("bs", outputs.backscatter.to_string_lossy().into_owned())?;
    result.set_item("ls_mask", outputs.ls_mask.map(|p| p.to_string_lossy().into_owned()))?;
    result.set_item("geotiff", outputs.geotiff.map(|p| p.to_string_lossy().into_owned()))?;
    Ok(result.into())
}

/// Linear power to dB, zeros become NaN
#[pyfunction]
fn linear_to_db(py: Python, data: PyReadonlyArray2<f32>) -> PyResult<PyObject> {
    let mut array = data.as_array().mapv(|v| if v == 0.0 { f32::NAN } else { v });
    convert_to_db(&mut array);
    Ok(array.to_pyarray(py).into())
}

/// Zero the noise columns at both swath edges of a GRD band
#[pyfunction]
fn border_noise(py: Python, data: PyReadonlyArray2<f32>) -> PyResult<PyObject> {
    let mut array = data.as_array().to_owned();
    let (left, right) = remove_border_noise(&mut array);

    let result = PyDict::new(py);
    result.set_item("data", array.to_pyarray(py))?;
    result.set_item("left_columns", left)?;
    result.set_item("right_columns", right)?;
    Ok(result.into())
}

#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(scene_info, m)?)?;
    m.add_function(wrap_pyfunction!(ard_template, m)?)?;
    m.add_function(wrap_pyfunction!(create_ard, m)?)?;
    m.add_function(wrap_pyfunction!(linear_to_db, m)?)?;
    m.add_function(wrap_pyfunction!(border_noise, m)?)?;
    Ok(())
}
